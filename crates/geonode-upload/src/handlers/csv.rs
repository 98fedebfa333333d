use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use geonode_core::models::HandlerKind;

use super::{base_file, ImportHandler, UploadFiles};
use crate::error::{UploadError, UploadResult};

const LAT_CANDIDATES: [&str; 3] = ["latitude", "lat", "y"];
const LON_CANDIDATES: [&str; 4] = ["longitude", "long", "lon", "x"];
const GEOM_CANDIDATES: [&str; 4] = ["geom", "geometry", "wkt_geom", "the_geom"];

/// Delimited text with either a lat/lon column pair or a WKT geometry column.
pub struct CsvHandler;

impl CsvHandler {
    fn check_header(header: &str) -> UploadResult<()> {
        let fields: Vec<String> = header
            .trim_start_matches('\u{feff}')
            .split([',', ';'])
            .map(|f| f.trim().trim_matches('"').to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .collect();

        let has = |candidates: &[&str]| fields.iter().any(|f| candidates.contains(&f.as_str()));
        if (has(&LAT_CANDIDATES) && has(&LON_CANDIDATES)) || has(&GEOM_CANDIDATES) {
            return Ok(());
        }
        Err(UploadError::InvalidCsv(format!(
            "Not enough geometry field are set. The available one are: {}",
            LAT_CANDIDATES
                .iter()
                .chain(LON_CANDIDATES.iter())
                .chain(GEOM_CANDIDATES.iter())
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

#[async_trait]
impl ImportHandler for CsvHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Csv
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["csv"]
    }

    async fn validate_format(&self, files: &UploadFiles) -> UploadResult<()> {
        let path = base_file(files, UploadError::InvalidCsv)?;
        let file = tokio::fs::File::open(path).await?;
        let mut header = String::new();
        BufReader::new(file).read_line(&mut header).await?;
        if header.trim().is_empty() {
            return Err(UploadError::InvalidCsv("the file has no header".to_string()));
        }
        Self::check_header(&header)
    }
}
