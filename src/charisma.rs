//! Charisma interchange files
//!
//! Whitespace-separated text, one surface point per line. Two layouts are
//! accepted: a plain 3-column `inline crossline depth` form, and the
//! 9-column export where the inline number sits in the third column, the
//! crossline number in the sixth and the depth in the ninth. The layout is
//! detected from the first data line; every line must then match it.

use crate::error::{CubeError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

// (inline, crossline, depth) column indices per accepted layout
const PLAIN_COLUMNS: (usize, [usize; 3]) = (3, [0, 1, 2]);
const CHARISMA_COLUMNS: (usize, [usize; 3]) = (9, [2, 5, 8]);

/// Read surface points in line coordinates
pub fn read_points(path: &Path) -> Result<Vec<[f32; 3]>> {
    let reader = BufReader::new(File::open(path)?);
    let mut layout: Option<(usize, [usize; 3])> = None;
    let mut points = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        let (width, columns) = match layout {
            Some(known) => known,
            None => {
                let detected = match fields.len() {
                    n if n == PLAIN_COLUMNS.0 => PLAIN_COLUMNS,
                    n if n == CHARISMA_COLUMNS.0 => CHARISMA_COLUMNS,
                    n => {
                        return Err(CubeError::Format(format!(
                            "{}:{}: {} columns, expected {} or {}",
                            path.display(),
                            number + 1,
                            n,
                            PLAIN_COLUMNS.0,
                            CHARISMA_COLUMNS.0
                        )))
                    }
                };
                layout = Some(detected);
                detected
            }
        };

        if fields.len() != width {
            return Err(CubeError::Format(format!(
                "{}:{}: {} columns, file started with {}",
                path.display(),
                number + 1,
                fields.len(),
                width
            )));
        }

        let mut point = [0.0f32; 3];
        for (slot, &column) in point.iter_mut().zip(columns.iter()) {
            *slot = fields[column].parse::<f32>().map_err(|_| {
                CubeError::Format(format!(
                    "{}:{}: `{}` is not a number",
                    path.display(),
                    number + 1,
                    fields[column]
                ))
            })?;
        }
        points.push(point);
    }

    if points.is_empty() {
        return Err(CubeError::Format(format!(
            "{}: no surface points",
            path.display()
        )));
    }
    Ok(points)
}

/// Write surface points in the plain 3-column layout
pub fn write_points(path: &Path, points: &[[f32; 3]]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for point in points {
        writeln!(writer, "{} {} {}", point[0], point[1], point[2])?;
    }
    writer.flush()?;
    Ok(())
}
