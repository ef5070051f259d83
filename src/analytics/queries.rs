use rusqlite::{params, Connection};

use super::types::{DailyClicks, Dashboard, TopProduct, WindowDays};

/// Most-clicked products since a cutoff. Ties go to the lexicographically smaller slug.
pub const TOP_PRODUCTS_SQL: &str = "
SELECT p.id, p.slug, p.name, COUNT(*) AS clicks
FROM click_events e
JOIN products p ON p.id = e.product_id
WHERE e.created_at >= ?1
GROUP BY p.id
ORDER BY clicks DESC, p.slug ASC
LIMIT ?2";

/// Clicks per UTC calendar day since a cutoff; days without clicks are absent.
pub const CLICKS_PER_DAY_SQL: &str = "
SELECT strftime('%Y-%m-%d', e.created_at / 1000, 'unixepoch') AS day, COUNT(*) AS clicks
FROM click_events e
WHERE e.created_at >= ?1
GROUP BY day
ORDER BY day ASC";

/// Aggregate the click log over `window` ending at `now_ms`. Read-only.
pub fn compute_dashboard(
    conn: &Connection,
    window: WindowDays,
    now_ms: i64,
    top_n: i64,
) -> rusqlite::Result<Dashboard> {
    let since = window.cutoff(now_ms);

    let mut stmt = conn.prepare(TOP_PRODUCTS_SQL)?;
    let top_products = stmt
        .query_map(params![since, top_n], |row| {
            Ok(TopProduct {
                product_id: row.get(0)?,
                slug: row.get(1)?,
                name: row.get(2)?,
                clicks: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(CLICKS_PER_DAY_SQL)?;
    let clicks_per_day = stmt
        .query_map(params![since], |row| {
            Ok(DailyClicks {
                day: row.get(0)?,
                clicks: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Dashboard {
        window_days: window.days(),
        top_products,
        clicks_per_day,
    })
}
