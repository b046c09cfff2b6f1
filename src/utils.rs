use log::info;
use polars::prelude::*;
use std::io;
use std::path::{Path, PathBuf};

const CACHE_DIR_NAME: &str = "lst_filler_cache";

pub fn get_cache_dir() -> io::Result<PathBuf> {
    dirs::cache_dir()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine system cache directory",
            )
        })
        .map(|p| p.join(CACHE_DIR_NAME))
}

pub async fn ensure_cache_dir_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("Cache path exists but is not a directory: {}", path.display()),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating cache directory: {}", path.display());
            tokio::fs::create_dir_all(path).await
        }
        Err(e) => Err(e),
    }
}

/// Lower-cases a column name and replaces spaces with underscores.
pub(crate) fn snake_case_column(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

/// Runs `write` against a temp file in the directory of `path` and renames it into place only
/// once `write` succeeds, so readers never see a partial file at `path`.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> PolarsResult<()>
where
    F: FnOnce(&mut std::fs::File) -> PolarsResult<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    write(temp.as_file_mut())?;
    temp.persist(path).map_err(|e| PolarsError::from(e.error))?;
    Ok(())
}

/// Writes a frame as snappy-compressed parquet, replacing any existing file.
pub(crate) fn write_parquet(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    write_atomically(path, |file| {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(df)
            .map(|_| ())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_column_names() {
        assert_eq!(snake_case_column("Station name"), "station_name");
        assert_eq!(snake_case_column("temperature"), "temperature");
        assert_eq!(
            snake_case_column("Temperature Quality_Code"),
            "temperature_quality_code"
        );
    }

    #[tokio::test]
    async fn creates_missing_cache_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_cache_dir_exists(&nested).await.unwrap();
        assert!(nested.is_dir());
        // second call is a no-op
        ensure_cache_dir_exists(&nested).await.unwrap();
    }

    #[test]
    fn failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.parquet");

        let err = write_atomically(&path, |file| {
            std::io::Write::write_all(file, b"PAR1")?;
            Err(PolarsError::ComputeError("interrupted".into()))
        })
        .unwrap_err();
        assert!(matches!(err, PolarsError::ComputeError(_)));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn write_parquet_replaces_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.parquet");
        std::fs::write(&path, b"PAR1").unwrap();

        let mut df = df!("station" => ["A", "B"], "temperature" => [20.5, 21.0]).unwrap();
        write_parquet(&mut df, &path).unwrap();

        let read = ParquetReader::new(std::fs::File::open(&path).unwrap())
            .finish()
            .unwrap();
        assert!(read.equals(&df));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn rejects_file_as_cache_dir() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let err = ensure_cache_dir_exists(tmp.path()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
