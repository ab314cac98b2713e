use std::ffi::OsString;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::annotations::ItemKind;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("expected KEY=VALUE, got: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

/// What `unhide` clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhideTarget {
    All,
    Kind(ItemKind),
}

impl FromStr for UnhideTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(UnhideTarget::All);
        }
        s.parse::<ItemKind>().map(UnhideTarget::Kind)
    }
}

impl fmt::Display for UnhideTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnhideTarget::All => f.write_str("all"),
            UnhideTarget::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pash",
    version,
    about = "Pash: dashboard settings, notes and layout from the terminal",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "pashrc")]
    pub pashrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show or change dashboard settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Manage sticky notes.
    Notes {
        #[command(subcommand)]
        action: Option<NotesAction>,
    },
    /// Hide a calendar event or task.
    Hide {
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ItemKind>()))]
        kind: ItemKind,
        id: String,
    },
    /// Show hidden items of one kind again, or all of them.
    Unhide {
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<UnhideTarget>()))]
        target: UnhideTarget,
    },
    /// Set an item's colour; omit the colour to reset it.
    Color {
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<ItemKind>()))]
        kind: ItemKind,
        id: String,
        color: Option<String>,
    },
    /// Show or change the layout order.
    Panes {
        #[command(subcommand)]
        action: Option<PanesAction>,
    },
    /// Show the cached weather snapshot.
    Weather,
    /// Drop the cached access token.
    Logout,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsAction {
    Show,
    Set {
        #[arg(
            required = true,
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>())
        )]
        assignments: Vec<KeyVal>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum NotesAction {
    List,
    Add {
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    Edit {
        id: i64,
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    Delete {
        id: i64,
    },
    Pin {
        id: i64,
    },
    Reorder {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PanesAction {
    Show,
    Set {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.KEY=VALUE` (or `rc.KEY:VALUE`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, KeyVal, NotesAction, UnhideTarget, preprocess_args};
    use crate::annotations::ItemKind;

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["pash", "rc.color=off", "notes", "rc.data.location:/x"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["pash", "notes"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.data.location".to_string(), "/x".to_string()),
            ]
        );
    }

    #[test]
    fn notes_add_joins_words() {
        let cli = GlobalCli::try_parse_from(["pash", "-v", "notes", "add", "buy", "milk"])
            .expect("parse");
        assert_eq!(cli.verbose, 1);
        assert_eq!(
            cli.command,
            Some(Command::Notes {
                action: Some(NotesAction::Add {
                    text: vec!["buy".to_string(), "milk".to_string()],
                }),
            })
        );
    }

    #[test]
    fn item_kinds_and_targets_parse() {
        let cli = GlobalCli::try_parse_from(["pash", "unhide", "tasks"]).expect("parse");
        assert_eq!(
            cli.command,
            Some(Command::Unhide {
                target: UnhideTarget::Kind(ItemKind::Task),
            })
        );
        assert!(GlobalCli::try_parse_from(["pash", "hide", "widget", "1"]).is_err());
    }

    #[test]
    fn key_val_requires_a_key() {
        assert!("=dark".parse::<KeyVal>().is_err());
        let kv: KeyVal = "THEME = dark".parse().expect("kv");
        assert_eq!(kv.key, "THEME");
        assert_eq!(kv.value, "dark");
    }
}
