use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use daylog::core::{Field, FieldKind, MetaValue, NoteKind, ViewMode};
use daylog::dates::{format_date_label, format_minutes_hm};
use daylog::logging::init_logging;
use daylog::parser::parse_scalar;
use daylog::projectors::{chart_projector, table_projector};
use daylog::{Dashboard, FsDocumentStore, Settings, replace_section};
use log::debug;

#[derive(Debug, Parser)]
#[command(
    name = "daylog",
    about = "Habit and journal dashboard over markdown daily notes",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Vault root that note folders are relative to.
    #[arg(long, global = true, default_value = ".")]
    vault: PathBuf,
    /// JSON settings file; defaults apply for anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show tracked days for a date window.
    Show(ShowArgs),

    /// Print one day's record.
    Day(DayArgs),

    /// Set or clear one field of a daily note.
    Set(SetArgs),

    /// Read or replace the goal of a weekly or monthly note.
    Goal(GoalArgs),

    /// Replace one `### Header` section of any markdown file.
    Section(SectionArgs),
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Date window to show.
    #[arg(long, value_enum, default_value_t = ModeArg::Recent)]
    mode: ModeArg,
    /// Reference date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
    /// Emit the sleep/screen-time chart series instead of table rows.
    #[arg(long)]
    chart: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Recent,
    Weekly,
    Monthly,
    Yearly,
}

impl From<ModeArg> for ViewMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Recent => ViewMode::Recent,
            ModeArg::Weekly => ViewMode::Weekly,
            ModeArg::Monthly => ViewMode::Monthly,
            ModeArg::Yearly => ViewMode::Yearly,
        }
    }
}

#[derive(Debug, Args)]
struct DayArgs {
    /// Day to read (YYYY-MM-DD). Defaults to today.
    date: Option<NaiveDate>,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SetArgs {
    /// Day to edit (YYYY-MM-DD).
    date: NaiveDate,
    /// Field name, e.g. bedtime, wakeTime, exercise, rating, tasks, journal.
    field: Field,
    /// New value; empty or `null` clears a metadata field, `-` reads stdin.
    value: String,
    /// Note kind holding the field.
    #[arg(long, value_enum, default_value_t = KindArg::Daily)]
    kind: KindArg,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<KindArg> for NoteKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Daily => NoteKind::Daily,
            KindArg::Weekly => NoteKind::Weekly,
            KindArg::Monthly => NoteKind::Monthly,
        }
    }
}

#[derive(Debug, Args)]
struct GoalArgs {
    #[arg(value_enum)]
    period: PeriodArg,
    /// Any date inside the period. Defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Replace the goal with this text (`-` reads stdin).
    #[arg(long)]
    set: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PeriodArg {
    Weekly,
    Monthly,
}

impl From<PeriodArg> for NoteKind {
    fn from(period: PeriodArg) -> Self {
        match period {
            PeriodArg::Weekly => NoteKind::Weekly,
            PeriodArg::Monthly => NoteKind::Monthly,
        }
    }
}

#[derive(Debug, Args)]
struct SectionArgs {
    /// Markdown file to rewrite.
    file: PathBuf,
    /// Section header, matched case-insensitively.
    header: String,
    /// New section body; read from stdin when omitted.
    #[arg(long)]
    body: Option<String>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose).context("starting logger")?;
    let Cli {
        vault,
        config,
        command,
        ..
    } = cli;
    match command {
        Commands::Show(args) => handle_show(args, &open_dashboard(&vault, config.as_deref())?),
        Commands::Day(args) => handle_day(args, &open_dashboard(&vault, config.as_deref())?),
        Commands::Set(args) => handle_set(args, &open_dashboard(&vault, config.as_deref())?),
        Commands::Goal(args) => handle_goal(args, &open_dashboard(&vault, config.as_deref())?),
        Commands::Section(args) => handle_section(args),
    }
}

fn open_dashboard(vault: &Path, config: Option<&Path>) -> Result<Dashboard<FsDocumentStore>> {
    let settings = match config {
        Some(path) => Settings::load(path).with_context(|| format!("loading {:?}", path))?,
        None => Settings::default(),
    };
    debug!("event=dashboard_opened module=cli vault={}", vault.display());
    Ok(Dashboard::new(FsDocumentStore::new(vault), settings))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

/// Text fields take the argument verbatim; the rest read it like a metadata
/// scalar, so `true`, `8` and `23:30` keep their natural types.
fn cli_value(field: Field, raw: &str) -> MetaValue {
    match field.kind() {
        FieldKind::Text => MetaValue::Text(raw.to_string()),
        _ => parse_scalar(raw.trim()),
    }
}

fn handle_show(args: ShowArgs, dashboard: &Dashboard<FsDocumentStore>) -> Result<()> {
    let ShowArgs {
        mode,
        date,
        json,
        chart,
    } = args;
    let reference = date.unwrap_or_else(today);
    let records = dashboard
        .load_range(mode.into(), reference)
        .with_context(|| format!("loading {} view around {reference}", ViewMode::from(mode)))?;

    if chart {
        let series = chart_projector::project(&records);
        if json {
            println!("{}", serde_json::to_string_pretty(&series)?);
        } else {
            let labels = &dashboard.settings().weekday_labels;
            for point in &series.points {
                let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |h| format!("{h:.1}"));
                println!(
                    "{}  sleep {:>5}  screen {:>5}",
                    format_date_label(point.date, labels),
                    show(point.sleep_hours),
                    show(point.screen_hours)
                );
            }
            println!(
                "y-max {}  targets: sleep {:.0}h, screen {:.0}h",
                series.y_max, series.sleep_target_hours, series.screen_target_hours
            );
        }
        return Ok(());
    }

    let rows = table_projector::project(&records, &dashboard.settings().weekday_labels);
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        eprintln!("No daily notes found in the selected window.");
        return Ok(());
    }
    for row in rows {
        let r = &row.record;
        let time = |t: Option<daylog::core::TimeOfDay>| {
            t.map_or_else(|| "--:--".to_string(), |t| t.to_string())
        };
        let flag = |on: bool, mark: char| if on { mark } else { '.' };
        println!(
            "{}  {}-{} {:>7}  screen {}  {}{}{}  {}",
            row.label,
            time(r.bedtime),
            time(r.wake_time),
            row.sleep.as_deref().unwrap_or(""),
            time(r.screen_time),
            flag(r.exercise, 'E'),
            flag(r.reading, 'R'),
            flag(r.sobriety, 'S'),
            r.rating.map_or_else(|| "-".to_string(), |v| format!("{v}/10")),
        );
    }
    Ok(())
}

fn handle_day(args: DayArgs, dashboard: &Dashboard<FsDocumentStore>) -> Result<()> {
    let DayArgs { date, json } = args;
    let date = date.unwrap_or_else(today);
    let record = dashboard
        .load_day(date)
        .with_context(|| format!("loading daily note for {date}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }
    println!("{}", format_date_label(date, &dashboard.settings().weekday_labels));
    println!("  source: {}", record.source);
    for field in Field::DAY_FIELDS {
        let value = record.field_value(field);
        match field.kind() {
            FieldKind::Text if !value.is_null() && !value.to_string().is_empty() => {
                println!("  {field}:");
                for line in value.to_string().lines() {
                    println!("    {line}");
                }
            }
            FieldKind::Text => println!("  {field}:"),
            _ => println!("  {field}: {value}"),
        }
    }
    if let Some(minutes) = record.sleep_minutes() {
        println!("  sleep: {}", format_minutes_hm(minutes));
    }
    Ok(())
}

fn handle_set(args: SetArgs, dashboard: &Dashboard<FsDocumentStore>) -> Result<()> {
    let SetArgs {
        date,
        field,
        value,
        kind,
    } = args;
    let raw = if value == "-" { read_stdin()? } else { value };
    let value = cli_value(field, &raw);
    let kind = NoteKind::from(kind);
    dashboard
        .update_field(kind, date, field, &value)
        .with_context(|| {
            format!(
                "updating {field} in {}",
                dashboard.locator_for(kind, date)
            )
        })?;
    Ok(())
}

fn handle_goal(args: GoalArgs, dashboard: &Dashboard<FsDocumentStore>) -> Result<()> {
    let GoalArgs {
        period,
        date,
        set,
        json,
    } = args;
    let kind = NoteKind::from(period);
    let reference = date.unwrap_or_else(today);

    if let Some(text) = set {
        let text = if text == "-" { read_stdin()? } else { text };
        dashboard
            .update_goal(kind, reference, &text)
            .with_context(|| format!("updating goal in {}", dashboard.locator_for(kind, reference)))?;
        return Ok(());
    }

    let goal = dashboard
        .load_goal(kind, reference)
        .with_context(|| format!("loading {kind} goal for {reference}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&goal)?);
        return Ok(());
    }
    match goal {
        Some(goal) => {
            println!("{}", goal.period_label);
            if !goal.content.is_empty() {
                println!("{}", goal.content);
            }
        }
        None => eprintln!(
            "No {kind} note at {}.",
            dashboard.locator_for(kind, reference)
        ),
    }
    Ok(())
}

fn handle_section(args: SectionArgs) -> Result<()> {
    let SectionArgs {
        file,
        header,
        body,
        in_place,
    } = args;
    let body = match body {
        Some(body) => body,
        None => read_stdin()?,
    };
    let rewritten = rewrite_section_file(&file, &header, &body)?;
    if in_place {
        fs::write(&file, rewritten.as_bytes()).with_context(|| format!("writing {:?}", file))?;
    } else {
        print!("{rewritten}");
    }
    Ok(())
}

fn rewrite_section_file(path: &Path, header: &str, body: &str) -> Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    replace_section(&text, header, body).with_context(|| format!("rewriting {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn vault_with_day(body: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let days = tmp.path().join("Area/Daily/Days");
        fs::create_dir_all(&days).expect("mkdir days");
        let note = days.join("2024-01-17 Wed.md");
        fs::write(&note, body).expect("write note");
        (tmp, note)
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 17).expect("date")
    }

    #[test]
    fn cli_value_keeps_natural_types() {
        assert_eq!(cli_value(Field::Exercise, "true"), MetaValue::Bool(true));
        assert_eq!(cli_value(Field::Rating, " 8 "), MetaValue::Integer(8));
        assert_eq!(cli_value(Field::Bedtime, "23:45"), MetaValue::from("23:45"));
        assert_eq!(cli_value(Field::Bedtime, ""), MetaValue::Null);
        assert_eq!(cli_value(Field::Tasks, "- [ ] a"), MetaValue::from("- [ ] a"));
    }

    #[test]
    fn set_writes_into_the_dated_note() {
        let (tmp, note) = vault_with_day("---\n운동: false\n---\n### Journal\nhi\n");
        let dashboard = open_dashboard(tmp.path(), None).expect("dashboard");

        let args = SetArgs {
            date: day(),
            field: Field::Bedtime,
            value: "23:45".into(),
            kind: KindArg::Daily,
        };
        handle_set(args, &dashboard).expect("set bedtime");
        let args = SetArgs {
            date: day(),
            field: Field::Exercise,
            value: "true".into(),
            kind: KindArg::Daily,
        };
        handle_set(args, &dashboard).expect("set exercise");

        let text = fs::read_to_string(&note).expect("read note");
        assert_eq!(text, "---\n운동: true\n취침: 23:45\n---\n### Journal\nhi\n");
        let record = dashboard.load_day(day()).expect("load");
        assert!(record.exercise);
        assert_eq!(record.bedtime.map(|t| t.to_string()).as_deref(), Some("23:45"));
    }

    #[test]
    fn set_on_missing_note_fails() {
        let (tmp, _note) = vault_with_day("");
        let dashboard = open_dashboard(tmp.path(), None).expect("dashboard");
        let args = SetArgs {
            date: NaiveDate::from_ymd_opt(2024, 1, 18).expect("date"),
            field: Field::Journal,
            value: "x".into(),
            kind: KindArg::Daily,
        };
        assert!(handle_set(args, &dashboard).is_err());
    }

    #[test]
    fn config_file_changes_layout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = tmp.path().join("daylog.json");
        fs::write(&config, r#"{ "dailyNotesFolder": "journal", "dailyFormat": "YYYY-MM-DD" }"#)
            .expect("write config");
        fs::create_dir_all(tmp.path().join("journal")).expect("mkdir");
        fs::write(tmp.path().join("journal/2024-01-17.md"), "### Todo\n- [ ] a\n")
            .expect("write note");

        let dashboard = open_dashboard(tmp.path(), Some(&config)).expect("dashboard");
        let record = dashboard.load_day(day()).expect("load");
        assert_eq!(record.tasks, "- [ ] a");
        assert!(open_dashboard(tmp.path(), Some(&tmp.path().join("missing.json"))).is_err());
    }

    #[test]
    fn section_rewrite_keeps_the_rest() {
        let (_tmp, note) = vault_with_day("# Day\n### Todo\nold\n### Journal\nkeep\n");
        let out = rewrite_section_file(&note, "todo", "- [x] new").expect("rewrite");
        assert_eq!(out, "# Day\n### Todo\n- [x] new\n### Journal\nkeep\n");
        assert!(rewrite_section_file(&note, "", "x").is_err());
    }
}
