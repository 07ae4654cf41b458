//! Theme tag for a fund, derived from its name when none is stored.

use common::db;
use rusqlite::Connection;

/// First matching entry wins, so order matters (e.g. "Banking & Financial" is Banking).
const FOCUS_KEYWORDS: &[(&str, &[&str])] = &[
    ("Infra", &["infrastructure", "infra"]),
    ("Banking", &["banking", "bank"]),
    ("Financial", &["financial", "finance"]),
    ("Pharma", &["pharma", "healthcare"]),
    ("IT", &["technology", "tech", "digital"]),
    ("FMCG", &["fmcg", "consumption", "consumer"]),
    ("Auto", &["auto", "automobile"]),
    ("Energy", &["energy", "power"]),
    ("Realty", &["realty", "real estate", "housing"]),
    ("Metal", &["metal", "steel"]),
    ("Manufacturing", &["manufacturing"]),
    ("PSU", &["psu", "public sector"]),
    ("MNC", &["mnc"]),
    ("Gold", &["gold"]),
    ("Silver", &["silver"]),
    ("Large Cap", &["large cap", "largecap", "bluechip"]),
    ("Mid Cap", &["mid cap", "midcap"]),
    ("Small Cap", &["small cap", "smallcap"]),
    ("Micro Cap", &["micro cap", "microcap"]),
    ("Multi Cap", &["multi cap", "multicap"]),
    ("Flexi Cap", &["flexi cap", "flexicap"]),
    ("Contra", &["contra", "contrarian"]),
    ("Value", &["value"]),
    ("Focused", &["focused"]),
    ("Momentum", &["momentum"]),
    ("Quant", &["quant"]),
    ("ESG", &["esg", "sustainable"]),
    ("Balanced", &["balanced", "hybrid"]),
    ("Arbitrage", &["arbitrage"]),
    ("Tax Saver", &["tax", "elss"]),
    ("Nifty 50", &["nifty 50", "nifty50"]),
    ("Index", &["index"]),
    ("US", &["us ", "usa", "nasdaq"]),
    ("Global", &["global", "international", "world"]),
];

pub const DEFAULT_FOCUS: &str = "Equity";

pub fn extract_focus(fund_name: &str) -> &'static str {
    let name = fund_name.to_lowercase();
    FOCUS_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map_or(DEFAULT_FOCUS, |(focus, _)| *focus)
}

/// The stored tag if present and non-blank, otherwise [`extract_focus`].
pub fn focus_for(stored: Option<&str>, fund_name: &str) -> String {
    match stored.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => extract_focus(fund_name).to_string(),
    }
}

/// Stores the name-derived tag for every fund without one. Returns how many were tagged.
pub fn tag_untagged(conn: &Connection) -> rusqlite::Result<usize> {
    let mut tagged = 0;
    for fund in db::list_funds(conn)? {
        if fund.focus.as_deref().is_some_and(|f| !f.trim().is_empty()) {
            continue;
        }
        if db::set_fund_focus(conn, fund.id, extract_focus(&fund.fund_name))? {
            tagged += 1;
        }
    }
    Ok(tagged)
}
