use std::io::{self, Write};

/// Digits needed to print every line number of a `line_count`-line listing.
pub fn line_number_width(line_count: usize) -> usize {
    line_count.max(1).ilog10() as usize + 1
}

/// Writes `source` one line at a time, each prefixed with its zero-padded
/// 1-based line number. Trailing whitespace is stripped from every line.
pub fn write_numbered<W: Write + ?Sized>(out: &mut W, source: &str) -> io::Result<()> {
    let lines: Vec<&str> = source.split('\n').collect();
    let width = line_number_width(lines.len());
    for (index, line) in lines.iter().enumerate() {
        writeln!(out, "{:0width$} {}", index + 1, line.trim_end())?;
    }
    Ok(())
}
