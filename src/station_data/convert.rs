use crate::station_data::clean::{clean_frame, CleanOptions};
use crate::station_data::error::StationDataError;
use crate::utils::write_parquet;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Reads a delimited text file with a header row. Blank and `NA` fields are null, and the
/// whole file is used for type inference since sparse columns often start empty.
pub fn read_delimited(path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|opts| {
            opts.with_separator(separator)
                .with_null_values(Some(NullValues::AllColumns(vec!["".into(), "NA".into()])))
        })
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
}

/// Outcome of a directory conversion. Failures don't stop the run.
#[derive(Debug, Default)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, PolarsError)>,
}

/// Converts every `*.csv` in `input_dir` to a cleaned, snappy-compressed parquet file named
/// after the CSV's stem. `output_dir` defaults to `input_dir` and is created if needed.
pub fn convert_csv_dir_to_parquet(
    input_dir: &Path,
    output_dir: Option<&Path>,
    options: &CleanOptions,
) -> Result<ConversionReport, StationDataError> {
    let output_dir = output_dir.unwrap_or(input_dir);
    std::fs::create_dir_all(output_dir)
        .map_err(|e| StationDataError::CacheDirCreation(output_dir.to_path_buf(), e))?;

    let mut csv_files: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .map_err(|e| StationDataError::ReadDir(input_dir.to_path_buf(), e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    csv_files.sort();
    info!(
        "Converting {} CSV files from {} to parquet",
        csv_files.len(),
        input_dir.display()
    );

    let progress = ProgressBar::new(csv_files.len() as u64).with_message("Converting");
    if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        progress.set_style(style);
    }

    let mut report = ConversionReport::default();
    for csv in csv_files {
        let stem = csv
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parquet_path = output_dir.join(format!("{stem}.parquet"));

        let result = read_delimited(&csv, b',')
            .and_then(|df| clean_frame(df, options))
            .and_then(|mut df| write_parquet(&mut df, &parquet_path));
        match result {
            Ok(()) => report.converted.push(parquet_path),
            Err(e) => {
                warn!("Error converting {}: {}", csv.display(), e);
                report.failed.push((csv, e));
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    info!(
        "Converted {} files, {} failed",
        report.converted.len(),
        report.failed.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_pipe_separated_with_na() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GHCNh_SFM00068816_por.psv");
        std::fs::write(
            &path,
            "Station_ID|Year|temperature|temperature_Quality_Code\n\
             SFM00068816|2023|21.5|1\n\
             SFM00068816|2023|NA|\n",
        )
        .unwrap();

        let df = read_delimited(&path, b'|').unwrap();
        assert_eq!(df.shape(), (2, 4));
        assert_eq!(df.column("temperature").unwrap().null_count(), 1);
        assert_eq!(df.column("temperature").unwrap().f64().unwrap().get(0), Some(21.5));
    }

    #[test]
    fn converts_directory_and_collects_failures() {
        let input = tempfile::tempdir().unwrap();
        let output = input.path().join("parquet");
        std::fs::write(
            input.path().join("SFM00068816.csv"),
            "Station_ID,temperature,temperature_Quality_Code,pres_wx_MW1\n\
             SFM00068816,20.1,,\n\
             SFM00068816,,5,RA\n",
        )
        .unwrap();
        std::fs::write(input.path().join("broken.csv"), "a,b\n1,2,3,4\n").unwrap();
        std::fs::write(input.path().join("notes.txt"), "ignored").unwrap();

        let report =
            convert_csv_dir_to_parquet(input.path(), Some(&output), &CleanOptions::default())
                .unwrap();

        assert_eq!(report.converted, vec![output.join("SFM00068816.parquet")]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("broken.csv"));

        let df = LazyFrame::scan_parquet(output.join("SFM00068816.parquet"), Default::default())
            .unwrap()
            .collect()
            .unwrap();
        let codes: Vec<_> = df
            .column("temperature_Quality_Code")
            .unwrap()
            .str()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(codes, ["0", "5"]);
    }
}
