use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use rust_xlsxwriter::Workbook;
use thiserror::Error;
use tracing::{debug, info};

use crate::records::{
    InputRecord, InputTable, OutputRecord, IDENTIFIER_COLUMN, PROPERTY_CODE_COLUMN,
};

pub const SHEET_NAME: &str = "Resultados";

const DETAIL_COLUMNS: [&str; 5] = ["fonte", "proprietario", "endereco", "codigo_imovel", "erro"];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("Input CSV is empty")]
    Empty,
    #[error("Input CSV is missing the required column `{0}`")]
    MissingColumn(&'static str),
    #[error("Input CSV could not be parsed: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Xlsx,
    Both,
}

impl OutputFormat {
    fn wants_csv(&self) -> bool {
        matches!(self, OutputFormat::Csv | OutputFormat::Both)
    }

    fn wants_xlsx(&self) -> bool {
        matches!(self, OutputFormat::Xlsx | OutputFormat::Both)
    }
}

/// How results are written
#[derive(Debug, Clone)]
pub struct OutputOptions {
    pub dir: PathBuf,
    pub format: OutputFormat,
    /// Adds source, owner, address, property id and error columns
    pub detailed: bool,
}

/// Files written for one run
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub csv: Option<PathBuf>,
    pub xlsx: Option<PathBuf>,
}

impl Artifacts {
    pub fn paths(&self) -> Vec<&Path> {
        self.csv.iter().chain(self.xlsx.iter()).map(PathBuf::as_path).collect()
    }
}

fn decode_cell(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Reads a headed CSV. Blank rows are dropped and short rows padded.
///
/// Cells are decoded lossily, so a stray Latin-1 byte only mangles the
/// character it belongs to.
pub fn read_csv<R: Read>(reader: R) -> Result<InputTable, InputError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let h = decode_cell(raw);
            let h = if idx == 0 { h.trim_start_matches('\u{feff}') } else { h.as_str() };
            h.trim().to_string()
        })
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(InputError::Empty);
    }

    let mut records = Vec::new();
    for row in rdr.byte_records() {
        let cells: Vec<String> = row?.iter().map(decode_cell).collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, header)| (header.clone(), cells.get(idx).cloned().unwrap_or_default()))
            .collect();
        records.push(InputRecord::new(fields));
    }

    if records.is_empty() {
        return Err(InputError::Empty);
    }
    if !headers.iter().any(|h| h == PROPERTY_CODE_COLUMN) {
        return Err(InputError::MissingColumn(PROPERTY_CODE_COLUMN));
    }

    debug!("Read {} rows with columns {:?}", records.len(), headers);
    Ok(InputTable { headers, records })
}

pub fn read_csv_file(path: &Path) -> Result<InputTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open input CSV: {}", path.display()))?;
    Ok(read_csv(file)?)
}

/// Input columns followed by `cpf/cnpj` (kept in place if the input already has it)
pub fn output_headers(input_headers: &[String], detailed: bool) -> Vec<String> {
    let mut headers = input_headers.to_vec();
    if !headers.iter().any(|h| h == IDENTIFIER_COLUMN) {
        headers.push(IDENTIFIER_COLUMN.to_string());
    }
    if detailed {
        for column in DETAIL_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                headers.push(column.to_string());
            }
        }
    }
    headers
}

fn cell_value(record: &OutputRecord, column: &str, detailed: bool) -> String {
    if column == IDENTIFIER_COLUMN {
        return record.identifier.clone();
    }
    if detailed {
        match column {
            "fonte" => return record.source.label().to_string(),
            "proprietario" => return record.fields.owner_display_name.clone(),
            "endereco" => return record.fields.property_address.clone(),
            "codigo_imovel" => return record.fields.internal_property_id.clone(),
            "erro" => return record.error.clone().unwrap_or_default(),
            _ => {}
        }
    }
    record.input.get(column).unwrap_or("").to_string()
}

pub fn output_row(record: &OutputRecord, headers: &[String], detailed: bool) -> Vec<String> {
    headers
        .iter()
        .map(|column| cell_value(record, column, detailed))
        .collect()
}

pub fn write_csv(
    path: &Path,
    input_headers: &[String],
    records: &[OutputRecord],
    detailed: bool,
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    let mut wtr = csv::Writer::from_writer(file);

    let headers = output_headers(input_headers, detailed);
    wtr.write_record(&headers)?;
    for record in records {
        wtr.write_record(output_row(record, &headers, detailed))?;
    }

    wtr.flush()?;
    info!("💾 Exported {} rows to {}", records.len(), path.display());
    Ok(())
}

pub fn write_xlsx(
    path: &Path,
    input_headers: &[String],
    records: &[OutputRecord],
    detailed: bool,
) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    let headers = output_headers(input_headers, detailed);
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, header.as_str())?;
    }
    for (row_idx, record) in records.iter().enumerate() {
        let row = (row_idx + 1) as u32;
        for (col, value) in output_row(record, &headers, detailed).iter().enumerate() {
            worksheet.write_string(row, col as u16, value.as_str())?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write XLSX file: {}", path.display()))?;
    info!("💾 Exported {} rows to {}", records.len(), path.display());
    Ok(())
}

/// `resultados_<millis>.<ext>`
pub fn artifact_name(timestamp_millis: i64, extension: &str) -> String {
    format!("resultados_{}.{}", timestamp_millis, extension)
}

pub fn write_outputs(
    options: &OutputOptions,
    input_headers: &[String],
    records: &[OutputRecord],
) -> Result<Artifacts> {
    std::fs::create_dir_all(&options.dir)
        .with_context(|| format!("Failed to create output dir {}", options.dir.display()))?;

    let timestamp = chrono::Utc::now().timestamp_millis();
    let mut artifacts = Artifacts::default();

    if options.format.wants_xlsx() {
        let path = options.dir.join(artifact_name(timestamp, "xlsx"));
        write_xlsx(&path, input_headers, records, options.detailed)?;
        artifacts.xlsx = Some(path);
    }
    if options.format.wants_csv() {
        let path = options.dir.join(artifact_name(timestamp, "csv"));
        write_csv(&path, input_headers, records, options.detailed)?;
        artifacts.csv = Some(path);
    }

    Ok(artifacts)
}

/// Deletes earlier `.csv`/`.xlsx` results from the output directory.
pub fn purge_previous_outputs(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_result = path.is_file()
            && matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("csv") | Some("xlsx")
            );
        if is_result {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{ExtractedFields, ResultSource};

    fn table(csv: &str) -> InputTable {
        read_csv(csv.as_bytes()).unwrap()
    }

    fn done(record: &InputRecord, identifier: &str) -> OutputRecord {
        OutputRecord::extracted(
            record.clone(),
            ResultSource::Document,
            ExtractedFields {
                identifier: identifier.to_string(),
                owner_display_name: "ACME LTDA".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_read_csv_keeps_header_order_and_pads_rows() {
        let t = table("ncodimov,nrazaoso,bairro\n123,ACME,CENTRO\n456\n");
        assert_eq!(t.headers, vec!["ncodimov", "nrazaoso", "bairro"]);
        assert_eq!(t.records.len(), 2);
        assert_eq!(t.records[1].get("nrazaoso"), Some(""));
        assert_eq!(t.records[1].property_code(), Some("456"));
    }

    #[test]
    fn test_read_csv_tolerates_latin1_cells() {
        let t = read_csv(&b"ncodimov,nrazaoso\n123,JOS\xC9\n456,ACME\n"[..]).unwrap();
        assert_eq!(t.records.len(), 2);
        assert_eq!(t.records[0].property_code(), Some("123"));
        assert_eq!(t.records[0].get("nrazaoso"), Some("JOS\u{fffd}"));
        assert_eq!(t.records[1].owner_name(), Some("ACME"));
    }

    #[test]
    fn test_read_csv_strips_bom_and_skips_blank_rows() {
        let t = table("\u{feff}ncodimov,nrazaoso\n123,ACME\n,\n\n789,\n");
        assert_eq!(t.headers[0], "ncodimov");
        assert_eq!(t.records.len(), 2);
    }

    #[test]
    fn test_read_csv_rejects_empty_input() {
        assert!(matches!(read_csv("".as_bytes()), Err(InputError::Empty)));
        assert!(matches!(
            read_csv("ncodimov,nrazaoso\n".as_bytes()),
            Err(InputError::Empty)
        ));
    }

    #[test]
    fn test_read_csv_rejects_missing_property_column() {
        let err = read_csv("codigo,nome\n1,ACME\n".as_bytes()).unwrap_err();
        assert!(matches!(err, InputError::MissingColumn("ncodimov")));
    }

    #[test]
    fn test_output_headers_append_identifier_once() {
        let input = vec!["ncodimov".to_string(), "cpf/cnpj".to_string()];
        assert_eq!(output_headers(&input, false), input);

        let input = vec!["ncodimov".to_string()];
        assert_eq!(output_headers(&input, false), vec!["ncodimov", "cpf/cnpj"]);
        assert_eq!(output_headers(&input, true).len(), 7);
    }

    #[test]
    fn test_output_row_fills_identifier_and_details() {
        let t = table("ncodimov,nrazaoso\n123,ACME\n");
        let record = done(&t.records[0], "123.456.789-01");
        let headers = output_headers(&t.headers, true);
        let row = output_row(&record, &headers, true);

        assert_eq!(row[0], "123");
        assert_eq!(row[1], "ACME");
        assert_eq!(row[2], "123.456.789-01");
        assert_eq!(row[3], "PDF");
        assert_eq!(row[4], "ACME LTDA");
        assert_eq!(row[7], "");
    }

    #[test]
    fn test_write_csv_round_trips_identifier_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let t = table("ncodimov,nrazaoso\n123,ACME\n456,BETA\n");
        let records = vec![
            done(&t.records[0], "123.456.789-01"),
            OutputRecord::failed(t.records[1].clone(), "timeout"),
        ];

        write_csv(&path, &t.headers, &records, false).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "ncodimov,nrazaoso,cpf/cnpj");
        assert_eq!(lines[1], "123,ACME,123.456.789-01");
        assert_eq!(lines[2], "456,BETA,ERRO");
    }

    #[test]
    fn test_write_outputs_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let options = OutputOptions {
            dir: dir.path().join("outputs"),
            format: OutputFormat::Both,
            detailed: false,
        };
        let t = table("ncodimov\n1\n");
        let records = vec![done(&t.records[0], "")];

        let artifacts = write_outputs(&options, &t.headers, &records).unwrap();
        assert_eq!(artifacts.paths().len(), 2);
        for path in artifacts.paths() {
            assert!(path.exists());
        }

        std::fs::write(options.dir.join("keep.txt"), "x").unwrap();
        assert_eq!(purge_previous_outputs(&options.dir).unwrap(), 2);
        assert!(options.dir.join("keep.txt").exists());
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name(1700000000000, "csv"), "resultados_1700000000000.csv");
    }
}
