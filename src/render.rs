use colored::*;
use pulse_core::{ChatTurn, Delta, TurnFailure, TurnObserver};
use std::io::{self, Write};

/// Prints a streaming turn to the terminal as it arrives.
pub struct TerminalRenderer {
    show_thinking: bool,
    in_thinking: bool,
    printed_answer: bool,
}

impl TerminalRenderer {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            in_thinking: false,
            printed_answer: false,
        }
    }
}

impl TurnObserver for TerminalRenderer {
    fn on_chunk(&mut self, delta: &Delta) {
        let mut stdout = io::stdout();
        match delta {
            Delta::Thinking(text) => {
                if !self.show_thinking {
                    return;
                }
                if !self.in_thinking {
                    let _ = write!(stdout, "{}", "💭 ".dimmed());
                    self.in_thinking = true;
                }
                let _ = write!(stdout, "{}", text.dimmed().italic());
            }
            Delta::Answer(text) => {
                if self.in_thinking {
                    let _ = writeln!(stdout, "\n");
                    self.in_thinking = false;
                }
                self.printed_answer = true;
                let _ = write!(stdout, "{}", text);
            }
        }
        let _ = stdout.flush();
    }

    fn on_complete(&mut self, turn: &ChatTurn) {
        if self.printed_answer {
            println!();
        }

        if !turn.sources().is_empty() {
            println!("\n{}", "Sources:".bold().blue());
            for (i, source) in turn.sources().iter().enumerate() {
                let index = format!("{}.", i + 1);
                if source.url.is_empty() {
                    println!("{} {}", index.bold(), source.title.yellow());
                } else {
                    println!(
                        "{} {} {}",
                        index.bold(),
                        source.title.yellow(),
                        format!("<{}>", source.url).dimmed()
                    );
                }
                println!("   {}", source.snippet.dimmed());
            }
        }

        if !turn.suggested_follow_ups().is_empty() {
            println!("\n{}", "You might also ask:".bold().green());
            for question in turn.suggested_follow_ups() {
                println!("  • {}", question);
            }
        }
    }

    fn on_error(&mut self, failure: &TurnFailure) {
        if self.printed_answer || self.in_thinking {
            println!();
        }
        eprintln!("{} {}", "Error:".red().bold(), failure.message);
        if failure.transient {
            eprintln!("{}", "You can resubmit the same question.".dimmed());
        }
    }
}
