use crate::activation::{ActivationError, Secret, SecretProvider};
use crate::config::ActivationSection;
use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Password;
use std::io::{self, BufRead, IsTerminal};

/// Prompts on the terminal, or reads stdin line by line when it is piped.
pub struct TerminalSecretProvider {
    guidance: ActivationSection,
}

impl TerminalSecretProvider {
    pub fn new(guidance: ActivationSection) -> Self {
        Self { guidance }
    }

    fn print_banner(&self) {
        eprintln!("{}", style("-".repeat(40)).dim());
        eprintln!("{}", style("First run: activation required.").bold());
        eprintln!(
            "{}",
            style("Your API key will be embedded in the config and the activation block removed.")
                .dim()
        );
        if !self.guidance.key_url.trim().is_empty() {
            eprintln!("Get a key: {}", style(&self.guidance.key_url).cyan());
        }
        eprintln!("{}", style("-".repeat(40)).dim());
    }

    fn prompt_terminal(&self) -> Result<Secret, ActivationError> {
        let theme = ColorfulTheme::default();
        loop {
            let value = Password::with_theme(&theme)
                .with_prompt(&self.guidance.prompt)
                .allow_empty_password(true)
                .interact()
                .map_err(|err| ActivationError::Prompt(err.to_string()))?;
            let value = value.trim();
            if !value.is_empty() {
                return Ok(Secret::new(value));
            }
            eprintln!("API key cannot be empty.");
        }
    }
}

impl SecretProvider for TerminalSecretProvider {
    fn request_secret(&self) -> Result<Secret, ActivationError> {
        self.print_banner();
        if io::stdin().is_terminal() {
            return self.prompt_terminal();
        }
        eprintln!("{}:", self.guidance.prompt);
        read_secret_from(io::stdin().lock())
    }
}

/// First non-blank line of `reader`, trimmed.
pub fn read_secret_from(reader: impl BufRead) -> Result<Secret, ActivationError> {
    for line in reader.lines() {
        let line = line.map_err(|err| ActivationError::Prompt(err.to_string()))?;
        let value = line.trim();
        if !value.is_empty() {
            return Ok(Secret::new(value));
        }
        eprintln!("API key cannot be empty.");
    }
    Err(ActivationError::Prompt(
        "input ended before an API key was entered".to_string(),
    ))
}
