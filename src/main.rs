use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use flowreader::cfi;
use flowreader::popup;
use flowreader::reading_status::ReadingStatuses;
use flowreader::settings::{ColumnMode, Settings, preferred_config_path};
use flowreader::style::calculate_layout;
use flowreader::surface::{Rect, Size};

/// Inspector for the flowreader rendering engine
#[derive(Parser, Debug)]
#[command(name = "flowreader", version, about = "Inspect locations, layouts and popups")]
struct Cli {
    /// Log level written to flowreader.log
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Location token utilities
    Cfi {
        #[command(subcommand)]
        command: CfiCommand,
    },
    /// Column layout for a container
    Layout {
        width: f64,
        height: f64,
        #[arg(long)]
        scrolled: bool,
        #[arg(long)]
        vertical: bool,
        #[arg(long, value_enum)]
        columns: Option<ColumnArg>,
    },
    /// Selection popup placement
    Popup {
        /// Pane size as WIDTHxHEIGHT
        #[arg(long, value_parser = parse_size)]
        pane: Size,
        /// Selection rectangle as LEFT,TOP,WIDTH,HEIGHT (repeatable)
        #[arg(long = "rect", value_parser = parse_rect, required = true)]
        rects: Vec<Rect>,
        #[arg(long)]
        vertical: bool,
        /// Include the options panel of an annotated selection
        #[arg(long)]
        options: bool,
        /// Place the ask-AI popup instead
        #[arg(long)]
        ask_ai: bool,
    },
    /// Reading status of stored books
    Status {
        /// JSON status file
        file: PathBuf,
    },
    /// Print the effective settings
    Settings,
}

#[derive(Subcommand, Debug)]
enum CfiCommand {
    /// Order of two tokens in the document
    Compare { a: String, b: String },
    /// Start (or end) boundary of a range token
    Collapse {
        token: String,
        #[arg(long)]
        end: bool,
    },
    /// Whether a token falls inside a range token
    InRange { token: String, range: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColumnArg {
    Auto,
    One,
    Two,
}

impl From<ColumnArg> for ColumnMode {
    fn from(arg: ColumnArg) -> Self {
        match arg {
            ColumnArg::Auto => ColumnMode::Auto,
            ColumnArg::One => ColumnMode::One,
            ColumnArg::Two => ColumnMode::Two,
        }
    }
}

fn parse_size(value: &str) -> Result<Size> {
    let Some((width, height)) = value.split_once('x') else {
        bail!("expected WIDTHxHEIGHT, got {value:?}");
    };
    Ok(Size::new(width.trim().parse()?, height.trim().parse()?))
}

fn parse_rect(value: &str) -> Result<Rect> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid rectangle {value:?}"))?;
    let [left, top, width, height] = parts[..] else {
        bail!("expected LEFT,TOP,WIDTH,HEIGHT, got {value:?}");
    };
    Ok(Rect::new(left, top, width, height))
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().or_else(preferred_config_path);
    let settings = Settings::load_or_default(config_path.as_deref());

    match cli.command {
        Command::Cfi { command } => match command {
            CfiCommand::Compare { a, b } => {
                println!("{:?}", cfi::compare(&a, &b)?);
            }
            CfiCommand::Collapse { token, end } => {
                println!("{}", cfi::collapse(&token, end)?);
            }
            CfiCommand::InRange { token, range } => {
                println!("{}", cfi::in_range(&token, &range)?);
            }
        },
        Command::Layout {
            width,
            height,
            scrolled,
            vertical,
            columns,
        } => {
            let mut view = settings.view;
            view.scrolled |= scrolled;
            view.vertical |= vertical;
            if let Some(columns) = columns {
                view.column_mode = columns.into();
            }
            let layout = calculate_layout(&view, Size::new(width, height));
            println!("max-column-count: {}", layout.max_column_count);
            println!("max-inline-size: {}px", layout.max_inline_size);
            println!("max-block-size: {}px", layout.max_block_size);
            println!("gap: {:.2}px", layout.gap_px);
        }
        Command::Popup {
            pane,
            rects,
            vertical,
            options,
            ask_ai,
        } => {
            let geometry = if ask_ai {
                popup::ask_ai_popup_geometry(&rects, pane, vertical)
            } else {
                popup::annotation_popup_geometry(&rects, pane, vertical, options)
            };
            match geometry {
                Some(geometry) => println!("{}", serde_json::to_string_pretty(&geometry)?),
                None => println!("no popup: selection has no usable geometry"),
            }
        }
        Command::Status { file } => {
            let statuses = ReadingStatuses::load_from_file(&file)?;
            let mut books: Vec<_> = statuses.iter().collect();
            books.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (book_id, status) in books {
                println!(
                    "{book_id}: {:?} {}/{}",
                    status.status, status.progress_current, status.progress_total
                );
            }
            if let Some((book_id, _)) = statuses.most_recent() {
                println!("most recent: {book_id}");
            }
        }
        Command::Settings => {
            print!("{}", serde_yaml::to_string(&settings)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create("flowreader.log")?,
    )?;
    info!("Starting flowreader inspector");

    let result = run(cli);
    if let Err(e) = &result {
        error!("Command failed: {e:#}");
    }
    result
}
