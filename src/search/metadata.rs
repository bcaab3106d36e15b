//! Location metadata parsing.
//!
//! Metadata is a delimited text file with a header line and one row per
//! location, aligned by position with the axis vector tables. Rows are split
//! line by line, except that a quoted field may continue over several lines.
//! A quote that is never closed degrades only its starting line to empty
//! fields, so one damaged row never shifts or swallows the rows after it.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern for coordinates embedded in Street View image URLs.
static LOCATION_PARAM_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)location=(-?\d+(?:\.\d+)?)\s*(?:,|%2C)\s*(-?\d+(?:\.\d+)?)")
        .expect("valid location regex")
});

/// Name shown for locations whose metadata carries no name.
pub const FALLBACK_NAME: &str = "Location from Street View";

/// Latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Returns `None` for non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self {
            latitude,
            longitude,
        })
    }

    fn parse_pair(lat: &str, lng: &str) -> Option<Self> {
        let lat = lat.trim().parse::<f64>().ok()?;
        let lng = lng.trim().parse::<f64>().ok()?;
        Self::new(lat, lng)
    }

    /// Google Maps panorama link for these coordinates.
    pub fn maps_url(&self) -> String {
        format!(
            "https://www.google.com/maps/@{},{},3a,75y,0h,90t",
            self.latitude, self.longitude
        )
    }
}

/// Free-text descriptions of a location, used for display only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveText {
    pub description: String,
    pub aesthetics: String,
    pub architecture: String,
    pub colors: String,
    pub mood: String,
}

impl DescriptiveText {
    /// First non-empty text in display priority order.
    pub fn display(&self) -> Option<&str> {
        [
            &self.description,
            &self.colors,
            &self.aesthetics,
            &self.architecture,
            &self.mood,
        ]
        .into_iter()
        .map(String::as_str)
        .find(|s| !s.is_empty())
    }
}

/// Metadata for one scouted location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationRecord {
    /// Row position in the feature store.
    pub index: usize,
    pub coordinates: Option<Coordinates>,
    pub image_url: String,
    pub public_url: String,
    pub name: String,
    pub text: DescriptiveText,
}

impl LocationRecord {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            FALLBACK_NAME
        } else {
            &self.name
        }
    }

    pub fn is_mappable(&self) -> bool {
        self.coordinates.is_some()
    }
}

/// Result of parsing a metadata file.
#[derive(Debug, Clone, Default)]
pub struct ParsedMetadata {
    pub records: Vec<LocationRecord>,
    /// Rows that could not be split and were replaced by empty fields.
    pub malformed_rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetadataError {
    #[error("metadata has no header line")]
    MissingHeader,

    #[error("metadata header could not be parsed")]
    InvalidHeader,
}

/// Column positions resolved from the header line.
#[derive(Debug, Default)]
struct Columns {
    image_url: Option<usize>,
    public_url: Option<usize>,
    name: Option<usize>,
    description: Option<usize>,
    aesthetics: Option<usize>,
    architecture: Option<usize>,
    colors: Option<usize>,
    mood: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
    coordinates: Option<usize>,
}

impl Columns {
    fn resolve(header: &[String]) -> Self {
        let mut columns = Columns::default();

        for (i, raw) in header.iter().enumerate() {
            let name = normalize_header(raw);
            let slot = match name.as_str() {
                "image_url" | "imageurl" | "image" => &mut columns.image_url,
                "public_url" | "publicurl" => &mut columns.public_url,
                "name" | "title" => &mut columns.name,
                "description" | "analysis_result" | "descriptive_text" => {
                    &mut columns.description
                }
                "aesthetics" => &mut columns.aesthetics,
                "architecture" => &mut columns.architecture,
                "colors" | "color" => &mut columns.colors,
                "mood" | "mood_vibes" => &mut columns.mood,
                "latitude" | "lat" => &mut columns.latitude,
                "longitude" | "lng" | "lon" => &mut columns.longitude,
                "coordinates" => &mut columns.coordinates,
                _ => continue,
            };
            // first matching column wins
            if slot.is_none() {
                *slot = Some(i);
            }
        }

        columns
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Parse metadata text into location records.
///
/// Fails only when there is no header. Row-level damage is recorded in
/// [`ParsedMetadata::malformed_rows`] and never aborts the parse.
pub fn parse_metadata(text: &str) -> Result<ParsedMetadata, MetadataError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }

    let (header_line, rows) = lines.split_first().ok_or(MetadataError::MissingHeader)?;
    if quoted_field_open(header_line, false) {
        return Err(MetadataError::InvalidHeader);
    }
    let header = split_row(header_line).ok_or(MetadataError::InvalidHeader)?;
    let columns = Columns::resolve(&header);
    log::debug!("metadata header: {:?}", header);

    let mut parsed = ParsedMetadata {
        records: Vec::with_capacity(rows.len()),
        malformed_rows: Vec::new(),
    };

    for (index, row) in logical_rows(rows).into_iter().enumerate() {
        let fields = match row.as_deref().and_then(split_row) {
            Some(fields) => fields,
            None => {
                log::warn!("metadata row {} is malformed, using empty fields", index);
                parsed.malformed_rows.push(index);
                Vec::new()
            }
        };
        parsed.records.push(build_record(index, &columns, &fields));
    }

    Ok(parsed)
}

/// Group lines into rows, joining a quoted field that spans lines.
///
/// A row whose quote never closes before the end of the file yields `None`
/// and grouping resumes at the line after it.
fn logical_rows<'a>(lines: &[&'a str]) -> Vec<Option<Cow<'a, str>>> {
    let mut rows = Vec::with_capacity(lines.len());
    let mut next = 0;

    while let Some(line) = lines.get(next) {
        next += 1;
        let mut open = quoted_field_open(line, false);
        if !open {
            rows.push(Some(Cow::Borrowed(*line)));
            continue;
        }

        let mut joined = line.to_string();
        let mut end = next;
        while open && end < lines.len() {
            joined.push('\n');
            joined.push_str(lines[end]);
            open = quoted_field_open(lines[end], true);
            end += 1;
        }

        if open {
            rows.push(None);
        } else {
            rows.push(Some(Cow::Owned(joined)));
            next = end;
        }
    }

    rows
}

/// Whether a quoted field is still open at the end of `text`.
///
/// A quote only opens a field as its first character, the same rule the
/// csv reader applies; quotes inside an unquoted field are literal.
fn quoted_field_open(text: &str, mut open: bool) -> bool {
    let mut field_start = !open;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if open {
            // "" is an escaped quote
            if c == '"' && chars.next_if_eq(&'"').is_none() {
                open = false;
            }
        } else if c == '"' && field_start {
            open = true;
        }
        field_start = !open && c == ',';
    }

    open
}

/// Split one row into trimmed fields.
///
/// Returns `None` when the csv reader rejects the row.
fn split_row(line: &str) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        Ok(false) => Some(Vec::new()),
        Err(e) => {
            log::debug!("csv reader rejected row: {e}");
            None
        }
    }
}

fn build_record(index: usize, columns: &Columns, fields: &[String]) -> LocationRecord {
    let field = |col: Option<usize>| -> String {
        col.and_then(|i| fields.get(i))
            .cloned()
            .unwrap_or_default()
    };

    let image_url = field(columns.image_url);
    let coordinates = explicit_coordinates(columns, fields)
        .or_else(|| coordinates_from_url(&image_url));

    LocationRecord {
        index,
        coordinates,
        image_url,
        public_url: field(columns.public_url),
        name: field(columns.name),
        text: DescriptiveText {
            description: field(columns.description),
            aesthetics: field(columns.aesthetics),
            architecture: field(columns.architecture),
            colors: field(columns.colors),
            mood: field(columns.mood),
        },
    }
}

fn explicit_coordinates(columns: &Columns, fields: &[String]) -> Option<Coordinates> {
    let get = |col: Option<usize>| col.and_then(|i| fields.get(i)).map(String::as_str);

    if let (Some(lat), Some(lng)) = (get(columns.latitude), get(columns.longitude)) {
        if let Some(coords) = Coordinates::parse_pair(lat, lng) {
            return Some(coords);
        }
    }

    let pair = get(columns.coordinates)?;
    let (lat, lng) = pair.split_once(',')?;
    Coordinates::parse_pair(lat, lng)
}

/// Recover coordinates from a `location=<lat>,<lng>` URL parameter.
pub fn coordinates_from_url(url: &str) -> Option<Coordinates> {
    let caps = LOCATION_PARAM_REGEX.captures(url)?;
    Coordinates::parse_pair(caps.get(1)?.as_str(), caps.get(2)?.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "image_url,public_url,name,description,colors,aesthetics,architecture";

    #[test]
    fn test_basic_rows() {
        let text = format!(
            "{HEADER}\n\
             \"https://maps.example/streetview?location=40.7128,-74.0060&heading=90\",https://img/1.jpg,Old Mill,Red brick mill,red,industrial,brick\n\
             ,,,,,,\n"
        );

        let parsed = parse_metadata(&text).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.malformed_rows.is_empty());

        let first = &parsed.records[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.name, "Old Mill");
        assert_eq!(first.public_url, "https://img/1.jpg");
        assert_eq!(first.text.colors, "red");
        let coords = first.coordinates.unwrap();
        assert!((coords.latitude - 40.7128).abs() < 1e-9);
        assert!((coords.longitude + 74.006).abs() < 1e-9);

        let second = &parsed.records[1];
        assert_eq!(second.index, 1);
        assert!(second.coordinates.is_none());
        assert_eq!(second.display_name(), FALLBACK_NAME);
    }

    #[test]
    fn test_quoted_field_with_delimiter() {
        let text = format!(
            "{HEADER}\n\
             u,p,\"Warehouse, Pier 4\",\"Wide, open \"\"loft\"\" space\",,,\n"
        );

        let parsed = parse_metadata(&text).unwrap();
        let record = &parsed.records[0];
        assert_eq!(record.name, "Warehouse, Pier 4");
        assert_eq!(record.text.description, "Wide, open \"loft\" space");
        assert_eq!(record.text.colors, "");
    }

    #[test]
    fn test_unbalanced_quote_degrades_row_only() {
        let text = format!(
            "{HEADER}\n\
             a,b,First,,,,\n\
             a,b,\"Broken,,,,\n\
             a,b,Third,,,,\n"
        );

        let parsed = parse_metadata(&text).unwrap();
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.malformed_rows, vec![1]);

        assert_eq!(parsed.records[0].name, "First");
        assert_eq!(parsed.records[1], LocationRecord { index: 1, ..Default::default() });
        assert_eq!(parsed.records[2].name, "Third");
    }

    #[test]
    fn test_quoted_field_spanning_lines() {
        let text = "name,description\nA,\"line one\nline two\"\nB,plain\n";

        let parsed = parse_metadata(text).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.malformed_rows.is_empty());
        assert_eq!(parsed.records[0].text.description, "line one\nline two");
        assert_eq!(parsed.records[1].index, 1);
        assert_eq!(parsed.records[1].name, "B");
    }

    #[test]
    fn test_multiline_field_next_to_unclosed_quote() {
        let text = "name,description\n\
                    A,\"spans\n\
                    two lines\"\n\
                    B,\"never closed\n\
                    C,plain\n";

        let parsed = parse_metadata(text).unwrap();
        let names: Vec<_> = parsed.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "", "C"]);
        assert_eq!(parsed.malformed_rows, vec![1]);
        assert_eq!(parsed.records[0].text.description, "spans\ntwo lines");
        assert_eq!(parsed.records[2].index, 2);
    }

    #[test]
    fn test_bare_quote_inside_field_is_literal() {
        let text = "name,description\nLoft,12\" ceiling pipes\nB,plain\n";

        let parsed = parse_metadata(text).unwrap();
        assert!(parsed.malformed_rows.is_empty());
        assert_eq!(parsed.records[0].name, "Loft");
        assert_eq!(parsed.records[0].text.description, "12\" ceiling pipes");
        assert_eq!(parsed.records[1].name, "B");
    }

    #[test]
    fn test_quote_scanner() {
        assert!(!quoted_field_open("a,b,c", false));
        assert!(!quoted_field_open("a,\"b,c\",d", false));
        assert!(!quoted_field_open("12\" pipes,x", false));
        assert!(quoted_field_open("a,\"open", false));
        assert!(quoted_field_open("a,\"still \"\" open", false));
        assert!(!quoted_field_open("closes\" here", true));
        assert!(quoted_field_open("no quote", true));
    }

    #[test]
    fn test_explicit_coordinates_preferred() {
        let text = "Image_url,Latitude,Longitude\n\
                    \"https://x/?location=1.0,2.0\",51.5,-0.12\n";

        let parsed = parse_metadata(text).unwrap();
        let coords = parsed.records[0].coordinates.unwrap();
        assert_eq!(coords, Coordinates::new(51.5, -0.12).unwrap());
    }

    #[test]
    fn test_coordinates_column() {
        let text = "name,coordinates\nPark,\"48.85, 2.35\"\n";
        let parsed = parse_metadata(text).unwrap();
        assert_eq!(
            parsed.records[0].coordinates,
            Coordinates::new(48.85, 2.35)
        );
    }

    #[test]
    fn test_out_of_range_coordinates_ignored() {
        let text = "latitude,longitude\n95.0,10.0\n";
        let parsed = parse_metadata(text).unwrap();
        assert!(parsed.records[0].coordinates.is_none());
    }

    #[test]
    fn test_short_row_and_crlf() {
        let text = "name,description,colors\r\nOnly name\r\n\r\n";
        let parsed = parse_metadata(text).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].name, "Only name");
        assert_eq!(parsed.records[0].text.description, "");
    }

    #[test]
    fn test_interior_blank_line_keeps_alignment() {
        let text = "name\nA\n\nC\n";
        let parsed = parse_metadata(text).unwrap();
        let names: Vec<_> = parsed.records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "", "C"]);
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(parse_metadata("").unwrap_err(), MetadataError::MissingHeader);
        assert_eq!(parse_metadata("\n\n").unwrap_err(), MetadataError::MissingHeader);
    }

    #[test]
    fn test_url_coordinate_recovery() {
        assert_eq!(
            coordinates_from_url("https://maps.googleapis.com/maps/api/streetview?size=640x640&location=34.05,-118.25&fov=90"),
            Coordinates::new(34.05, -118.25)
        );
        assert_eq!(
            coordinates_from_url("https://x/?location=10.5%2C20.25"),
            Coordinates::new(10.5, 20.25)
        );
        assert!(coordinates_from_url("https://x/?pano=abc").is_none());
        assert!(coordinates_from_url("").is_none());
    }

    #[test]
    fn test_display_text_fallback() {
        let mut text = DescriptiveText::default();
        assert_eq!(text.display(), None);

        text.architecture = "gothic".into();
        assert_eq!(text.display(), Some("gothic"));

        text.colors = "teal".into();
        assert_eq!(text.display(), Some("teal"));

        text.description = "a chapel".into();
        assert_eq!(text.display(), Some("a chapel"));
    }

    #[test]
    fn test_maps_url() {
        let coords = Coordinates::new(1.5, -2.25).unwrap();
        assert_eq!(
            coords.maps_url(),
            "https://www.google.com/maps/@1.5,-2.25,3a,75y,0h,90t"
        );
    }
}
