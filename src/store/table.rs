use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use crate::error::{CoreError, CoreResult};
use crate::models::Component;

use super::TableKind;

/// One durable table file. Exclusive ownership is enforced by the mutex
/// wrapping each instance in `DurableStore`; nothing else touches the path.
pub(super) struct TableFile {
    component: Component,
    kind: TableKind,
    path: PathBuf,
    header: String,
}

impl TableFile {
    /// Opens the table, creating the file with its header row if absent.
    /// Idempotent: an existing file is left untouched.
    pub fn initialize(
        data_dir: &Path,
        component: Component,
        kind: TableKind,
        header: String,
    ) -> CoreResult<Self> {
        let path = data_dir.join(format!("{component}_inspection_{kind}.csv"));
        let table = Self {
            component,
            kind,
            path,
            header,
        };

        if !table.path.exists() {
            table.rewrite(&[])?;
        }
        Ok(table)
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Appends one encoded row. The row is written in a single buffered
    /// write and flushed, so a later reader sees it whole or not at all.
    pub fn append_line(&mut self, line: &str) -> CoreResult<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| CoreError::io(&self.path, err))?;
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(|err| CoreError::io(&self.path, err))?;
        file.flush().map_err(|err| CoreError::io(&self.path, err))?;
        Ok(())
    }

    /// All data rows, header excluded, in file order.
    pub fn read_lines(&self) -> CoreResult<Vec<String>> {
        let file = File::open(&self.path).map_err(|err| CoreError::io(&self.path, err))?;
        let reader = BufReader::new(file);

        let mut lines = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| CoreError::io(&self.path, err))?;
            if index == 0 {
                if line != self.header {
                    return Err(CoreError::Validation(format!(
                        "{} has an unexpected header; refusing to read it",
                        self.path.display()
                    )));
                }
                continue;
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Replaces the file body with `lines`. Written to a temp file and
    /// renamed into place, so the old content stays intact until the new
    /// content is fully on disk.
    pub fn rewrite(&self, lines: &[String]) -> CoreResult<()> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let mut tmp =
                File::create(&tmp_path).map_err(|err| CoreError::io(&tmp_path, err))?;
            let mut body = String::with_capacity(self.header.len() + 1);
            body.push_str(&self.header);
            body.push('\n');
            for line in lines {
                body.push_str(line);
                body.push('\n');
            }
            tmp.write_all(body.as_bytes())
                .map_err(|err| CoreError::io(&tmp_path, err))?;
            tmp.sync_all().map_err(|err| CoreError::io(&tmp_path, err))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|err| CoreError::io(&self.path, err))?;
        Ok(())
    }

    pub fn count(&self) -> CoreResult<usize> {
        Ok(self.read_lines()?.len())
    }

    /// Truncates back to header-only. Only the transfer path calls this.
    pub fn clear(&self) -> CoreResult<()> {
        self.rewrite(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_table(dir: &Path) -> TableFile {
        TableFile::initialize(
            dir,
            Component::Od,
            TableKind::Events,
            "col_a,col_b".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = open_table(dir.path());
        table.append_line("1,2").unwrap();

        // Re-opening must not wipe existing rows.
        let table = open_table(dir.path());
        assert_eq!(table.read_lines().unwrap(), vec!["1,2".to_string()]);
    }

    #[test]
    fn append_read_count_clear() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = open_table(dir.path());

        assert_eq!(table.count().unwrap(), 0);
        table.append_line("1,2").unwrap();
        table.append_line("3,4").unwrap();
        assert_eq!(table.count().unwrap(), 2);

        table.clear().unwrap();
        assert_eq!(table.count().unwrap(), 0);
        // Header survives the clear.
        let raw = fs::read_to_string(dir.path().join("od_inspection_events.csv")).unwrap();
        assert_eq!(raw, "col_a,col_b\n");
    }

    #[test]
    fn foreign_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("od_inspection_events.csv");
        fs::write(&path, "something,else\n").unwrap();

        let table = open_table(dir.path());
        assert!(matches!(
            table.read_lines(),
            Err(CoreError::Validation(_))
        ));
    }
}
