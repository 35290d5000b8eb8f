use rusqlite::Connection;
use serde::Serialize;

/// Half-up rounding at one decimal place: `floor(10x + 0.5) / 10`.
/// Report cards show one decimal, and the grade letter is derived from the
/// displayed value so the two never disagree.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Grade bands, highest first. Percentages at or above the threshold earn
/// the letter; anything below the last band is a fail.
pub const GRADE_SCALE: &[(f64, &str)] = &[
    (90.0, "A+"),
    (80.0, "A"),
    (70.0, "B+"),
    (60.0, "B"),
    (50.0, "C+"),
    (40.0, "C"),
    (35.0, "P"),
];

pub const GRADE_FAIL: &str = "F";

pub fn grade_for(percentage: f64) -> &'static str {
    for (threshold, letter) in GRADE_SCALE {
        if percentage >= *threshold {
            return letter;
        }
    }
    GRADE_FAIL
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultTotals {
    pub total_obtained: f64,
    pub total_max: f64,
    pub percentage: f64,
    pub grade: String,
}

/// Aggregate per-subject marks into the exam result line. Only submitted
/// subjects count; there is no zero-filling for subjects not yet entered.
pub fn result_totals<I>(entries: I) -> ResultTotals
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut total_obtained = 0.0;
    let mut total_max = 0.0;
    for (obtained, max) in entries {
        total_obtained += obtained;
        total_max += max;
    }
    let percentage = if total_max > 0.0 {
        round_off_1_decimal(100.0 * total_obtained / total_max)
    } else {
        0.0
    };
    ResultTotals {
        total_obtained,
        total_max,
        percentage,
        grade: grade_for(percentage).to_string(),
    }
}

/// Re-derive a result row from its subject entries. Callers run this inside
/// the same transaction that modified the entries, so the stored aggregate
/// can never drift from the rows it summarizes.
pub fn recompute_result(conn: &Connection, result_id: &str, now: &str) -> anyhow::Result<ResultTotals> {
    let mut stmt = conn.prepare(
        "SELECT marks_obtained, total_marks FROM result_subjects
         WHERE result_id = ? ORDER BY position",
    )?;
    let entries = stmt
        .query_map([result_id], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let totals = result_totals(entries);
    conn.execute(
        "UPDATE results
         SET total_obtained = ?, total_max = ?, percentage = ?, grade = ?, updated_at = ?
         WHERE id = ?",
        (
            totals.total_obtained,
            totals.total_max,
            totals.percentage,
            &totals.grade,
            now,
            result_id,
        ),
    )?;
    Ok(totals)
}
