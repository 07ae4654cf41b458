use anyhow::{bail, Result};
use chrono::NaiveDate;
use common::config::Config;
use common::db::{self, Database};
use common::types::FundId;

use crate::compose::TrendTable;
use crate::jobs::DateRun;
use crate::{compare, focus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Refresh { force: bool },
    /// `recent` limits the run to the analysis window.
    Backfill { recent: bool, max_dates: usize },
    Fetch { date: NaiveDate, force: bool },
    Trends { limit: usize },
    Significant,
    Compare { dates: Vec<NaiveDate> },
    Watch { fund_id: FundId },
    Unwatch { fund_id: FundId },
    Watchlist,
    SetFocus { fund_id: FundId, tag: String },
    TagFocus,
    Verify,
}

impl Command {
    /// Commands that need the async database and the composed pipeline.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::Run
                | Self::Refresh { .. }
                | Self::Backfill { .. }
                | Self::Fetch { .. }
                | Self::Trends { .. }
                | Self::Verify
        )
    }
}

pub const DEFAULT_BACKFILL_DATES: usize = 50;

const USAGE: &str = "usage: pipeline [run | refresh [--force] | backfill [--recent] [--max-dates N] | \
fetch <YYYY-MM-DD> [--force] | trends [N] | significant | compare <YYYY-MM-DD>... | \
watch <fund_id> | unwatch <fund_id> | watchlist | focus <fund_id> <tag> | focus --auto | verify]";

fn parse_fund_id(arg: Option<String>, cmd: &str) -> Result<FundId, String> {
    let raw = arg.ok_or_else(|| format!("usage: pipeline {cmd} <fund_id>"))?;
    raw.parse()
        .map_err(|e| format!("invalid fund id {raw}: {e}"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("invalid date {raw} (want YYYY-MM-DD): {e}"))
}

fn parse_backfill<I>(mut args: I) -> Result<Command, String>
where
    I: Iterator<Item = String>,
{
    let mut recent = false;
    let mut max_dates = DEFAULT_BACKFILL_DATES;
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--recent" => recent = true,
            "--max-dates" => {
                let n = args
                    .next()
                    .ok_or_else(|| "usage: pipeline backfill --max-dates <N>".to_string())?;
                max_dates = n.parse().map_err(|e| format!("invalid date count {n}: {e}"))?;
            }
            other => return Err(format!("unknown backfill flag: {other}")),
        }
    }
    Ok(Command::Backfill { recent, max_dates })
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Run);
    };

    match cmd.as_str() {
        "run" => Ok(Command::Run),
        "refresh" => match args.next().as_deref() {
            None => Ok(Command::Refresh { force: false }),
            Some("--force") => Ok(Command::Refresh { force: true }),
            Some(other) => Err(format!("unknown refresh flag: {other}")),
        },
        "backfill" => parse_backfill(args),
        "fetch" => {
            let raw = args
                .next()
                .ok_or_else(|| "usage: pipeline fetch <YYYY-MM-DD> [--force]".to_string())?;
            let date = parse_date(&raw)?;
            let force = match args.next().as_deref() {
                None => false,
                Some("--force") => true,
                Some(other) => return Err(format!("unknown fetch flag: {other}")),
            };
            Ok(Command::Fetch { date, force })
        }
        "trends" => {
            let limit = match args.next() {
                None => 20,
                Some(n) => n.parse().map_err(|e| format!("invalid row count {n}: {e}"))?,
            };
            Ok(Command::Trends { limit })
        }
        "significant" => Ok(Command::Significant),
        "compare" => {
            let dates = args
                .map(|a| parse_date(&a))
                .collect::<Result<Vec<_>, _>>()?;
            if dates.is_empty() {
                return Err("usage: pipeline compare <YYYY-MM-DD>...".to_string());
            }
            Ok(Command::Compare { dates })
        }
        "watch" => Ok(Command::Watch {
            fund_id: parse_fund_id(args.next(), "watch")?,
        }),
        "unwatch" => Ok(Command::Unwatch {
            fund_id: parse_fund_id(args.next(), "unwatch")?,
        }),
        "watchlist" => Ok(Command::Watchlist),
        "focus" => match args.next() {
            Some(flag) if flag == "--auto" => Ok(Command::TagFocus),
            first => {
                let fund_id = parse_fund_id(first, "focus")?;
                let tag = args.collect::<Vec<_>>().join(" ");
                if tag.trim().is_empty() {
                    return Err("usage: pipeline focus <fund_id> <tag>".to_string());
                }
                Ok(Command::SetFocus { fund_id, tag })
            }
        },
        "verify" => Ok(Command::Verify),
        "-h" | "--help" | "help" => Err(USAGE.to_string()),
        other => Err(format!("unknown command: {other}\n{USAGE}")),
    }
}

/// Runs the synchronous commands. Async ones are dispatched from `main`.
pub fn run_command(db: &Database, cmd: &Command, cfg: &Config) -> Result<()> {
    match cmd {
        Command::Significant => show_significant(db, &cfg.significance.index_name),
        Command::Compare { dates } => show_compare(db, dates, cfg.analysis.top_k),
        Command::Watch { fund_id } => watch(db, *fund_id),
        Command::Unwatch { fund_id } => unwatch(db, *fund_id),
        Command::Watchlist => show_watchlist(db),
        Command::SetFocus { fund_id, tag } => set_focus(db, *fund_id, tag),
        Command::TagFocus => {
            let tagged = focus::tag_untagged(&db.conn)?;
            println!("tagged {tagged} funds");
            Ok(())
        }
        Command::Run
        | Command::Refresh { .. }
        | Command::Backfill { .. }
        | Command::Fetch { .. }
        | Command::Trends { .. }
        | Command::Verify => bail!("{cmd:?} is not a synchronous command"),
    }
}

fn show_significant(db: &Database, index_name: &str) -> Result<()> {
    let changes = db::significant_changes(&db.conn, index_name)?;
    println!("Significant {index_name} moves ({}):", changes.len());
    for c in changes {
        println!(
            "{}  {:>+7.2}%  {:<4}  {:>12.2} -> {:>12.2}",
            c.change_date,
            c.change_percent,
            c.change_type.as_str(),
            c.previous_close,
            c.current_close
        );
    }
    Ok(())
}

fn show_compare(db: &Database, dates: &[NaiveDate], limit: usize) -> Result<()> {
    let cmp = compare::compare_by_dates(&db.conn, dates, limit)?;
    let header: Vec<String> = cmp.dates.iter().map(|d| format!("{:>10}", d.format("%Y-%m-%d"))).collect();
    println!("rank  {:<50} {}  {:>8}", "fund", header.join(" "), "change");
    for r in cmp.rows {
        let values: Vec<String> = r.values.iter().map(|v| fmt_opt(*v, 10)).collect();
        println!(
            "{:>4}  {:<50} {}  {}",
            r.rank,
            truncate(&r.fund_name, 50),
            values.join(" "),
            fmt_opt(r.change, 8)
        );
    }
    Ok(())
}

pub fn watch(db: &Database, fund_id: FundId) -> Result<()> {
    let Some(fund) = db::fund_by_id(&db.conn, fund_id)? else {
        bail!("no fund with id {fund_id}");
    };
    if db::add_to_watchlist(&db.conn, fund_id)? {
        println!("watching {fund_id} {}", fund.fund_name);
    } else {
        println!("{fund_id} {} is already on the watchlist", fund.fund_name);
    }
    Ok(())
}

pub fn unwatch(db: &Database, fund_id: FundId) -> Result<()> {
    if db::remove_from_watchlist(&db.conn, fund_id)? {
        println!("removed {fund_id} from the watchlist");
    } else {
        println!("{fund_id} was not on the watchlist");
    }
    Ok(())
}

/// Overrides the name-derived focus tag for one fund.
pub fn set_focus(db: &Database, fund_id: FundId, tag: &str) -> Result<()> {
    let tag = tag.trim();
    if !db::set_fund_focus(&db.conn, fund_id, tag)? {
        bail!("no fund with id {fund_id}");
    }
    println!("{fund_id} focus set to {tag}");
    Ok(())
}

fn show_watchlist(db: &Database) -> Result<()> {
    let entries = db::watchlist(&db.conn)?;
    println!("Watchlist ({}):", entries.len());
    for e in entries {
        println!("{:>6}  {:<60}  {}", e.fund_id, e.fund_name, e.added_at);
    }
    Ok(())
}

pub fn print_date_run(run: &DateRun) {
    println!(
        "date={} rows={} error={}",
        run.date,
        run.rows_upserted,
        run.fetch_error.as_deref().unwrap_or("-"),
    );
    if let Some(outcome) = &run.detection {
        println!("significance: {outcome:?}");
    }
}

pub fn print_trends(table: &TrendTable, limit: usize) {
    let Some(reference) = table.reference_date else {
        println!("No returns stored yet.");
        return;
    };
    println!(
        "Trends as of {reference} ({} funds, {} window dates)",
        table.rows.len(),
        table.window_dates.len()
    );
    println!(
        "{:<44} {:>7} {:>7} {:>7} {:>6} {:>3} {:>8} {:>8}  signal",
        "fund", "today%", "min6m", "max6m", "cnt%", "slp", "dipmax", "mult"
    );
    for r in table.rows.iter().take(limit) {
        let s = &r.signals;
        let signal = match (s.buy, s.sell) {
            (true, _) => "BUY",
            (_, true) => "SELL",
            _ => "",
        };
        let pin = if r.watchlisted { "*" } else { " " };
        println!(
            "{pin}{:<43} {} {} {} {:>6.1} {:>3} {} {}  {signal}",
            truncate(&r.fund_name, 43),
            fmt_opt(s.today_pct, 7),
            fmt_opt(s.min_6m, 7),
            fmt_opt(s.max_6m, 7),
            s.count_pct,
            s.slope,
            fmt_opt(s.dip_max, 8),
            fmt_opt(s.multiplier, 8),
        );
    }
}

fn fmt_opt(v: Option<f64>, width: usize) -> String {
    match v {
        Some(x) => format!("{x:>width$.2}"),
        None => format!("{:>width$}", "-"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('~');
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> std::vec::IntoIter<String> {
        std::iter::once("pipeline")
            .chain(v.iter().copied())
            .map(String::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_parse_default_is_run() {
        assert_eq!(parse_args(args(&[])).unwrap(), Command::Run);
    }

    #[test]
    fn test_parse_refresh_flags() {
        assert_eq!(
            parse_args(args(&["refresh"])).unwrap(),
            Command::Refresh { force: false }
        );
        assert_eq!(
            parse_args(args(&["refresh", "--force"])).unwrap(),
            Command::Refresh { force: true }
        );
        assert!(parse_args(args(&["refresh", "--now"])).is_err());
    }

    #[test]
    fn test_parse_trends_and_compare() {
        assert_eq!(
            parse_args(args(&["trends"])).unwrap(),
            Command::Trends { limit: 20 }
        );
        assert_eq!(
            parse_args(args(&["trends", "5"])).unwrap(),
            Command::Trends { limit: 5 }
        );
        let cmp = parse_args(args(&["compare", "2026-01-01", "2026-01-14"])).unwrap();
        assert_eq!(
            cmp,
            Command::Compare {
                dates: vec![
                    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2026, 1, 14).unwrap()
                ]
            }
        );
        assert!(parse_args(args(&["compare"])).is_err());
        assert!(parse_args(args(&["compare", "14-01-2026"])).is_err());
    }

    #[test]
    fn test_parse_watch_requires_numeric_id() {
        assert_eq!(
            parse_args(args(&["watch", "42"])).unwrap(),
            Command::Watch { fund_id: 42 }
        );
        assert!(parse_args(args(&["watch"])).is_err());
        assert!(parse_args(args(&["unwatch", "abc"])).is_err());
        assert!(parse_args(args(&["bogus"])).is_err());
    }

    #[test]
    fn test_parse_backfill_flags() {
        assert_eq!(
            parse_args(args(&["backfill"])).unwrap(),
            Command::Backfill {
                recent: false,
                max_dates: DEFAULT_BACKFILL_DATES
            }
        );
        assert_eq!(
            parse_args(args(&["backfill", "--max-dates", "5", "--recent"])).unwrap(),
            Command::Backfill {
                recent: true,
                max_dates: 5
            }
        );
        assert!(parse_args(args(&["backfill", "--max-dates"])).is_err());
        assert!(parse_args(args(&["backfill", "--max-dates", "-1"])).is_err());
        assert!(parse_args(args(&["backfill", "--all"])).is_err());
    }

    #[test]
    fn test_parse_fetch_date() {
        assert_eq!(
            parse_args(args(&["fetch", "2025-12-01", "--force"])).unwrap(),
            Command::Fetch {
                date: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
                force: true
            }
        );
        assert!(parse_args(args(&["fetch"])).is_err());
        assert!(parse_args(args(&["fetch", "01/12/2025"])).is_err());
        assert!(parse_args(args(&["fetch", "2025-12-01", "--now"])).is_err());
    }

    #[test]
    fn test_parse_focus() {
        assert_eq!(
            parse_args(args(&["focus", "7", "Large", "Cap"])).unwrap(),
            Command::SetFocus {
                fund_id: 7,
                tag: "Large Cap".to_string()
            }
        );
        assert_eq!(parse_args(args(&["focus", "--auto"])).unwrap(), Command::TagFocus);
        assert!(parse_args(args(&["focus", "7"])).is_err());
        assert!(parse_args(args(&["focus"])).is_err());
    }

    #[test]
    fn test_async_commands() {
        assert!(Command::Verify.is_async());
        assert!(Command::Trends { limit: 1 }.is_async());
        assert!(Command::Backfill {
            recent: true,
            max_dates: 1
        }
        .is_async());
        assert!(!Command::Watchlist.is_async());
        assert!(!Command::TagFocus.is_async());
    }

    #[test]
    fn test_set_focus_stores_tag() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        let id = db::upsert_fund(&db.conn, &crate::fetch::tests::fund(1, "Axis Bluechip Fund", None), &[])
            .unwrap();

        set_focus(&db, id, " Thematic ").unwrap();
        let fund = db::fund_by_id(&db.conn, id).unwrap().unwrap();
        assert_eq!(fund.focus.as_deref(), Some("Thematic"));
        assert!(set_focus(&db, 999, "Thematic").is_err());
    }

    #[test]
    fn test_watch_unknown_fund_errors() {
        let db = Database::open(":memory:").unwrap();
        db.run_migrations().unwrap();
        assert!(watch(&db, 999).is_err());
    }

    #[test]
    fn test_fmt_helpers() {
        assert_eq!(fmt_opt(None, 4), "   -");
        assert_eq!(fmt_opt(Some(66.666), 6), " 66.67");
        assert_eq!(truncate("abcdef", 4), "abc~");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
