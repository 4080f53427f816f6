use colored::*;
use indicatif::MultiProgress;
use maestro_sync_core::reporter::{
    ConflictResolver, MissingFile, MissingResolution, TagChoice, TagConflict,
};
use maestro_sync_core::TagSet;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::warn;

/// Asks on the terminal. Spinners are suspended while waiting for input.
pub struct TerminalResolver {
    multi: MultiProgress,
}

impl TerminalResolver {
    pub fn new(multi: MultiProgress) -> Self {
        Self { multi }
    }
}

fn print_tags(label: &str, tags: &TagSet, other: &TagSet) {
    println!("  {}", label.bold());
    for (tag, values) in tags.iter() {
        let line = format!("    {}: {}", tag, values.join("; "));
        if other.get(tag) == Some(values) {
            println!("{}", line);
        } else {
            println!("{}", line.yellow());
        }
    }
}

impl ConflictResolver for TerminalResolver {
    fn resolve_modified_tags(&self, conflict: &TagConflict) -> TagChoice {
        self.multi.suspend(|| {
            println!();
            println!(
                "{} {}",
                "Tags changed on disk:".yellow(),
                conflict.path.display()
            );
            print_tags("Library", &conflict.db_tags, &conflict.disk_tags);
            print_tags("File", &conflict.disk_tags, &conflict.db_tags);
            match prompt_choice("Keep [l]ibrary tags, take [f]ile tags, or [s]kip?", &["l", "f", "s"]) {
                Ok(answer) if answer == "l" => TagChoice::UseDatabase,
                Ok(answer) if answer == "f" => TagChoice::UseDisk,
                Ok(_) => TagChoice::Defer,
                Err(e) => {
                    warn!("Could not read answer: {}", e);
                    TagChoice::Defer
                }
            }
        })
    }

    fn resolve_missing_files(&self, missing: &[MissingFile]) -> Vec<(PathBuf, MissingResolution)> {
        self.multi.suspend(|| {
            println!();
            println!("{} {} files", "Missing from disk:".red(), missing.len());
            let mut resolutions = Vec::new();
            for file in missing {
                println!("  {}", file.path.display());
                let answer = match prompt_choice("[d]elete from library, [r]elocate, or [s]kip?", &["d", "r", "s"]) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("Could not read answer: {}", e);
                        break;
                    }
                };
                match answer.as_str() {
                    "d" => resolutions.push((file.path.clone(), MissingResolution::Delete)),
                    "r" => match prompt_line("New path: ") {
                        Ok(path) if !path.is_empty() => resolutions.push((
                            file.path.clone(),
                            MissingResolution::Relocate(PathBuf::from(path)),
                        )),
                        Ok(_) => {}
                        Err(e) => warn!("Could not read path: {}", e),
                    },
                    _ => {}
                }
            }
            resolutions
        })
    }
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Loop until the answer is one of `choices`. End of input picks the last
/// choice.
fn prompt_choice(prompt: &str, choices: &[&str]) -> io::Result<String> {
    let fallback = choices.last().copied().unwrap_or_default().to_string();
    let mut input = String::new();

    loop {
        input.clear();
        print!("{} ", prompt);
        io::stdout().flush()?;

        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(fallback);
        }

        let answer = input.trim().to_lowercase();
        if choices.contains(&answer.as_str()) {
            return Ok(answer);
        }
    }
}

pub fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
