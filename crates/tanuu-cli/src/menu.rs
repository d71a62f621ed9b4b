//! Interactive menu
//!
//! Runs when `tanuu` is started without a subcommand.

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use tanuu_lib::suffix::validate_name;
use tanuu_lib::Orchestrator;

use crate::commands::{create, delete};
use crate::output::{print_error, print_info, OutputFormat};

const EXIT: &str = "EXIT";

/// Top-level menu choices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Create,
    Delete,
}

impl MenuAction {
    const ALL: [MenuAction; 2] = [MenuAction::Create, MenuAction::Delete];

    fn label(&self) -> &'static str {
        match self {
            MenuAction::Create => "Create Environment",
            MenuAction::Delete => "Delete Environment",
        }
    }
}

/// Interactive create/delete menu
pub struct InteractiveMenu<'a> {
    orchestrator: &'a Orchestrator,
    theme: ColorfulTheme,
}

impl<'a> InteractiveMenu<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self {
            orchestrator,
            theme: ColorfulTheme::default(),
        }
    }

    /// Show the menu and run the chosen workflow
    pub async fn run(&self) -> Result<()> {
        let labels: Vec<&str> = MenuAction::ALL.iter().map(MenuAction::label).collect();
        let selection = Select::with_theme(&self.theme)
            .with_prompt("What would you like to do?")
            .items(&labels)
            .default(0)
            .interact()?;

        match MenuAction::ALL[selection] {
            MenuAction::Create => self.create().await,
            MenuAction::Delete => self.delete().await,
        }
    }

    async fn create(&self) -> Result<()> {
        let name: String = Input::with_theme(&self.theme)
            .with_prompt("Environment name (type 'exit' to quit)")
            .validate_with(|input: &String| -> Result<(), String> {
                if input == "exit" {
                    return Ok(());
                }
                validate_name(input).map_err(|e| e.to_string())
            })
            .interact_text()?;

        if name == "exit" {
            print_info("Nothing created");
            return Ok(());
        }

        let gpu = Confirm::with_theme(&self.theme)
            .with_prompt("Add a GPU node group?")
            .default(false)
            .interact()?;

        let report = create::run_with_spinner(self.orchestrator, &name, gpu).await?;
        create::print_report(&report, OutputFormat::Table)
    }

    async fn delete(&self) -> Result<()> {
        let mut choices = self.orchestrator.list_environments().await?;
        if choices.is_empty() {
            print_error("No environments to delete");
            return Ok(());
        }
        choices.push(EXIT.to_string());

        let selection = Select::with_theme(&self.theme)
            .with_prompt("Select the environment to delete")
            .items(&choices)
            .default(0)
            .interact()?;

        let name = &choices[selection];
        if name == EXIT {
            print_info("Nothing deleted");
            return Ok(());
        }

        delete::delete_environment(self.orchestrator, name, OutputFormat::Table).await
    }
}
