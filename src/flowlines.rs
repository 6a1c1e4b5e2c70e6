//! Flowline table reader.
//!
//! Tab-separated text with a header row. Three columns are required:
//!
//! - `id`: segment id
//! - `toid`: downstream id, `0` or empty for an outlet, a comma-separated
//!   list for a diversion
//! - `geometry`: WKT `LINESTRING` or `LINESTRING Z`, read with the `wkt`
//!   crate
//!
//! Every other column becomes a named attribute, numeric when it parses as
//! a number. Blank lines and lines starting with `#` are skipped.
//!
//! Large files are memory-mapped and split with memchr; the lines are parsed
//! in parallel above [`PARALLEL_THRESHOLD`](crate::parallel::PARALLEL_THRESHOLD).

use crate::error::{Result, SfrError};
use crate::geometry::{Coord, LineString};
use crate::network::{AttrValue, FlowlineRecord, SegmentId};
use crate::parallel::ExecutionMode;
use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;
use wkt::Wkt;

/// Files smaller than this are read into memory instead of mapped.
const MMAP_THRESHOLD: usize = 1024 * 1024;

/// Read a flowline table from disk.
pub fn read_flowlines<P: AsRef<Path>>(path: P) -> Result<Vec<FlowlineRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let size = file.metadata()?.len() as usize;
    if size >= MMAP_THRESHOLD {
        // SAFETY: the map is read-only and dropped before returning.
        let mmap = unsafe { Mmap::map(&file)? };
        parse_flowlines(&mmap)
    } else {
        drop(file);
        let data = fs::read(path)?;
        parse_flowlines(&data)
    }
}

/// Column positions resolved from the header.
struct Columns {
    names: Vec<String>,
    id: usize,
    toid: usize,
    geometry: usize,
}

impl Columns {
    fn from_header(line: &[u8], line_no: usize) -> Result<Self> {
        let names: Vec<String> = split_tabs(line)
            .into_iter()
            .map(|f| Ok(utf8(f, line_no)?.trim().to_string()))
            .collect::<Result<_>>()?;
        let find = |name: &str| {
            names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .ok_or_else(|| SfrError::Parse {
                    line: line_no,
                    message: format!("missing required column '{}'", name),
                })
        };
        Ok(Self {
            id: find("id")?,
            toid: find("toid")?,
            geometry: find("geometry")?,
            names,
        })
    }
}

/// Parse a flowline table held in memory.
pub fn parse_flowlines(data: &[u8]) -> Result<Vec<FlowlineRecord>> {
    let lines = find_lines(data);
    let Some((&(header_no, header), body)) = lines.split_first() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(header, header_no)?;

    match ExecutionMode::select(body.len()) {
        ExecutionMode::Sequential => body
            .iter()
            .map(|&(no, line)| parse_record(line, no, &columns))
            .collect(),
        ExecutionMode::Parallel => body
            .par_iter()
            .map(|&(no, line)| parse_record(line, no, &columns))
            .collect(),
    }
}

/// Non-empty, non-comment lines with their 1-based line numbers.
fn find_lines(data: &[u8]) -> Vec<(usize, &[u8])> {
    let mut lines = Vec::new();
    let mut pos = 0;
    let mut line_no = 0;
    while pos < data.len() {
        line_no += 1;
        let end = memchr(b'\n', &data[pos..]).map_or(data.len(), |off| pos + off);
        let mut line = &data[pos..end];
        if let Some((&b'\r', rest)) = line.split_last() {
            line = rest;
        }
        if !line.iter().all(u8::is_ascii_whitespace) && line.first() != Some(&b'#') {
            lines.push((line_no, line));
        }
        pos = end + 1;
    }
    lines
}

fn split_tabs(line: &[u8]) -> Vec<&[u8]> {
    let mut fields = Vec::new();
    let mut start = 0;
    for tab in memchr_iter(b'\t', line) {
        fields.push(&line[start..tab]);
        start = tab + 1;
    }
    fields.push(&line[start..]);
    fields
}

fn utf8(bytes: &[u8], line_no: usize) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| SfrError::Parse {
        line: line_no,
        message: "invalid UTF-8".to_string(),
    })
}

fn parse_error(line: usize, message: impl Into<String>) -> SfrError {
    SfrError::Parse {
        line,
        message: message.into(),
    }
}

fn parse_id(text: &str, line_no: usize) -> Result<SegmentId> {
    text.trim()
        .parse::<SegmentId>()
        .map_err(|_| parse_error(line_no, format!("invalid segment id '{}'", text.trim())))
}

fn parse_record(line: &[u8], line_no: usize, columns: &Columns) -> Result<FlowlineRecord> {
    let fields = split_tabs(line);
    if fields.len() != columns.names.len() {
        return Err(parse_error(
            line_no,
            format!(
                "expected {} fields, found {}",
                columns.names.len(),
                fields.len()
            ),
        ));
    }

    let id = parse_id(utf8(fields[columns.id], line_no)?, line_no)?;
    let downstream_ids = utf8(fields[columns.toid], line_no)?
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| parse_id(s, line_no))
        .collect::<Result<Vec<_>>>()?;
    let (line, z) = parse_wkt_linestring(utf8(fields[columns.geometry], line_no)?)
        .map_err(|message| parse_error(line_no, message))?;

    let mut attributes = BTreeMap::new();
    for (i, field) in fields.iter().enumerate() {
        if i == columns.id || i == columns.toid || i == columns.geometry {
            continue;
        }
        let text = utf8(field, line_no)?.trim();
        if !text.is_empty() {
            attributes.insert(columns.names[i].clone(), AttrValue::parse(text));
        }
    }

    Ok(FlowlineRecord {
        id,
        downstream_ids,
        points: line.into_points(),
        z,
        attributes,
    })
}

/// Parse a WKT `LINESTRING`, returning the line and per-vertex z values
/// when every vertex carries one.
///
/// `LINESTRING Z`, `LINESTRING M` and `LINESTRING ZM` are accepted; measures
/// are ignored. A single-part `MULTILINESTRING` is read as its only part.
pub fn parse_wkt_linestring(
    text: &str,
) -> std::result::Result<(LineString<f64>, Option<Vec<f64>>), String> {
    let text = text.trim();
    let geometry = Wkt::<f64>::from_str(text).map_err(|e| format!("invalid WKT: {}", e))?;
    let coords = match geometry {
        Wkt::LineString(line) => line.0,
        Wkt::MultiLineString(multi) => {
            let mut parts = multi.0.into_iter();
            match (parts.next(), parts.next()) {
                (Some(line), None) => line.0,
                (None, _) => return Err("empty MULTILINESTRING".to_string()),
                _ => return Err("multi-part linestrings are not supported".to_string()),
            }
        }
        _ => return Err(format!("unsupported geometry '{}'", truncate(text))),
    };
    let z = coords
        .iter()
        .map(|c| c.z)
        .collect::<Option<Vec<f64>>>()
        .filter(|z| !z.is_empty());
    let line = coords.into_iter().map(|c| Coord { x: c.x, y: c.y }).collect();
    Ok((line, z))
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(32) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
