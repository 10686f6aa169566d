use std::fmt;

use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::db::{ImageSummary, Project, ProjectSummary};

/// Plain text table with left-aligned columns.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, T>(headers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Rows shorter than the header are padded with empty cells; extra cells are dropped.
    pub fn push_row<I, T>(&mut self, cells: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut row: Vec<String> = cells
            .into_iter()
            .take(self.headers.len())
            .map(Into::into)
            .collect();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(col, header)| {
                self.rows
                    .iter()
                    .map(|row| row[col].chars().count())
                    .chain(std::iter::once(header.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, cells: &[String], widths: &[usize]) -> fmt::Result {
    let last = cells.len().saturating_sub(1);
    for (col, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if col == last {
            writeln!(f, "{cell}")?;
        } else {
            write!(f, "{cell:<width$}  ")?;
        }
    }
    Ok(())
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.column_widths();
        write_row(f, &self.headers, &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_row(f, &rule, &widths)?;
        for row in &self.rows {
            write_row(f, row, &widths)?;
        }
        Ok(())
    }
}

pub fn format_time(ts: OffsetDateTime) -> String {
    ts.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| ts.to_string())
}

pub fn project_table(projects: &[ProjectSummary]) -> Table {
    let mut table = Table::new(["ID", "NAME", "CREATOR", "CLASSES", "IMAGES", "PENDING", "CREATED"]);
    for p in projects {
        table.push_row([
            p.id.to_string(),
            p.name.clone(),
            p.creator.clone(),
            p.class_count.to_string(),
            p.image_count.to_string(),
            p.pending_count.to_string(),
            format_time(p.created_at),
        ]);
    }
    table
}

/// Class palette of a project, one row per class id.
pub fn palette_table(project: &Project) -> Table {
    let mut table = Table::new(["ID", "CLASS", "COLOR", "SOURCE"]);
    for (id, entry) in project.palette.entries().iter().enumerate() {
        table.push_row([
            id.to_string(),
            entry.name.clone(),
            entry.color.to_string(),
            if entry.explicit { "explicit" } else { "default" }.to_string(),
        ]);
    }
    table
}

pub fn image_table(images: &[ImageSummary]) -> Table {
    let mut table = Table::new(["ID", "FILE", "STATUS", "DETECTIONS", "UPLOADED"]);
    for image in images {
        table.push_row([
            image.id.to_string(),
            image.file_name.clone(),
            image.status.to_string(),
            image.detection_count.to_string(),
            format_time(image.uploaded_at),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_aligned_to_widest_cell() {
        let mut table = Table::new(["ID", "NAME"]);
        table.push_row(["1", "street survey"]);
        table.push_row(["12", "x"]);

        let text = table.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID  NAME");
        assert_eq!(lines[1], "--  -------------");
        assert_eq!(lines[2], "1   street survey");
        assert_eq!(lines[3], "12  x");
    }

    #[test]
    fn short_rows_are_padded() {
        let mut table = Table::new(["A", "B", "C"]);
        table.push_row(["only"]);
        assert_eq!(table.rows()[0], vec!["only".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn empty_table_prints_header() {
        let table = Table::new(["ID"]);
        assert!(table.is_empty());
        assert_eq!(table.to_string(), "ID\n--\n");
    }
}
