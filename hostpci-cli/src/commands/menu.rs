//! Interactive menu, the default when no subcommand is given.

use crate::commands::{assign, gpu, guest, monitor, prompt};
use anyhow::Result;
use colored::Colorize;
use hostpci_core::Config;

const OPTIONS: [&str; 8] = [
    "List GPUs",
    "List guests",
    "Assign GPU to guest",
    "Remove GPU from guest",
    "Unbind GPU from host driver",
    "Release GPU to host",
    "Monitor GPU usage",
    "Exit",
];

fn print_menu() {
    println!();
    println!("{}", "GPU Passthrough".bold().underline());
    for (i, label) in OPTIONS.iter().enumerate() {
        println!("  {}. {}", i + 1, label);
    }
}

fn release(config: &Config) -> Result<()> {
    let device = prompt::device(None)?;
    let driver = prompt::optional("Host driver (empty for kernel default)")?;
    assign::release(config, Some(device), driver)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ListGpus,
    ListGuests,
    Assign,
    Remove,
    Unbind,
    Release,
    Monitor,
    Exit,
}

/// Map a menu answer to its action; `None` for anything unrecognised.
fn action(choice: &str) -> Option<Action> {
    let action = match choice.trim() {
        "1" => Action::ListGpus,
        "2" => Action::ListGuests,
        "3" => Action::Assign,
        "4" => Action::Remove,
        "5" => Action::Unbind,
        "6" => Action::Release,
        "7" => Action::Monitor,
        "8" | "q" => Action::Exit,
        _ => return None,
    };
    Some(action)
}

/// End of input exits the menu.
fn next_action(input: Option<&str>) -> Option<Action> {
    match input {
        Some(choice) => action(choice),
        None => Some(Action::Exit),
    }
}

/// Run the menu until the operator exits or input ends.
///
/// A failing action is reported and the menu continues.
pub async fn run(config: &Config) -> Result<()> {
    loop {
        print_menu();
        let input = prompt::read_line("Select an option")?;

        let outcome = match next_action(input.as_deref()) {
            Some(Action::ListGpus) => gpu::list(config),
            Some(Action::ListGuests) => guest::list(config).await,
            Some(Action::Assign) => assign::assign(config, None, None),
            Some(Action::Remove) => assign::remove(config, None),
            Some(Action::Unbind) => assign::unbind(config, None),
            Some(Action::Release) => release(config),
            Some(Action::Monitor) => monitor::run(),
            Some(Action::Exit) => return Ok(()),
            None => {
                let choice = input.unwrap_or_default();
                println!("{} Invalid option: {}", "⚠".yellow().bold(), choice);
                continue;
            }
        };

        if let Err(e) = outcome {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
        }
    }
}
