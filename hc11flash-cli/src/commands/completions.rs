//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::Cli;

/// Write the completion script for `shell` to `out`.
pub(crate) fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        write_completions(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_bash_completions_mention_subcommands() {
        let output = script(Shell::Bash);
        assert!(output.contains("hc11flash"));
        assert!(output.contains("upload-talker"));
        assert!(output.contains("erase-ee"));
    }

    #[test]
    fn test_zsh_and_fish_generate_output() {
        assert!(script(Shell::Zsh).contains("hc11flash"));
        assert!(script(Shell::Fish).contains("hc11flash"));
    }

    #[test]
    fn test_powershell_and_elvish_generate_output() {
        assert!(!script(Shell::PowerShell).is_empty());
        assert!(!script(Shell::Elvish).is_empty());
    }
}
