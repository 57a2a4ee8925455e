use anyhow::{Context, Result};
use std::io::Write;

use stride_core::CheckIn;

/// One CSV row per check-in, camelCase headers, in the order given.
pub fn write_check_ins_csv<W: Write>(out: W, rows: &[CheckIn]) -> Result<()> {
    let mut w = csv::Writer::from_writer(out);
    for row in rows {
        w.serialize(row)
            .with_context(|| format!("serialize check-in {}", row.id))?;
    }
    w.flush().context("flush csv")?;
    Ok(())
}
