//! Reach and segment table output.
//!
//! Uses itoa for integer formatting and ryu for float formatting
//! to avoid allocation in the hot path.

use crate::commands::renumber::{ReachNetwork, RoutedReach, RoutedSegment};
use crate::error::Result;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};

/// Buffer size for ReachWriter (1MB default).
const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Column names of the reach table.
pub const REACH_COLUMNS: &[&str] = &[
    "rno", "iseg", "ireach", "segment_id", "node", "k", "i", "j", "rchlen", "strtop", "slope",
    "width", "elev_up", "elev_dn", "outreach",
];

/// Column names of the segment table.
pub const SEGMENT_COLUMNS: &[&str] = &["nseg", "outseg", "segment_id", "nreach", "first_reach"];

/// Column names of the lowered model bottom table.
pub const BOTTOM_COLUMNS: &[&str] = &["node", "botm"];

/// Tab-separated writer for routed reaches and segments.
///
/// Cell indices and layers are zero-based; an unassigned layer is left
/// blank and an outlet is written as downstream id `0`.
pub struct ReachWriter<W: Write> {
    writer: BufWriter<W>,
    itoa_buf: itoa::Buffer,
    ryu_buf: ryu::Buffer,
}

impl<W: Write> ReachWriter<W> {
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, output)
    }

    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            itoa_buf: itoa::Buffer::new(),
            ryu_buf: ryu::Buffer::new(),
        }
    }

    fn write_header(&mut self, columns: &[&str]) -> Result<()> {
        for (i, name) in columns.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b"\t")?;
            }
            self.writer.write_all(name.as_bytes())?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    #[inline]
    fn write_int<I: itoa::Integer>(&mut self, n: I) -> Result<()> {
        self.writer.write_all(self.itoa_buf.format(n).as_bytes())?;
        Ok(())
    }

    #[inline]
    fn write_float(&mut self, f: f64) -> Result<()> {
        self.writer.write_all(self.ryu_buf.format(f).as_bytes())?;
        Ok(())
    }

    #[inline]
    fn write_tab(&mut self) -> Result<()> {
        self.writer.write_all(b"\t")?;
        Ok(())
    }

    pub fn write_reach_header(&mut self) -> Result<()> {
        self.write_header(REACH_COLUMNS)
    }

    pub fn write_segment_header(&mut self) -> Result<()> {
        self.write_header(SEGMENT_COLUMNS)
    }

    /// Write one reach row.
    pub fn write_reach(&mut self, routed: &RoutedReach) -> Result<()> {
        let reach = &routed.reach;
        self.write_int(routed.id)?;
        self.write_tab()?;
        self.write_int(routed.segment_number)?;
        self.write_tab()?;
        self.write_int(reach.seqno)?;
        self.write_tab()?;
        self.write_int(reach.segment_id)?;
        self.write_tab()?;
        self.write_int(reach.node)?;
        self.write_tab()?;
        if let Some(k) = routed.layer {
            self.write_int(k)?;
        }
        self.write_tab()?;
        self.write_int(reach.cell.row)?;
        self.write_tab()?;
        self.write_int(reach.cell.col)?;
        for value in [
            reach.length,
            reach.strtop,
            reach.slope,
            reach.width,
            reach.elevation_up,
            reach.elevation_down,
        ] {
            self.write_tab()?;
            self.write_float(value)?;
        }
        self.write_tab()?;
        self.write_int(routed.target.id())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Write one segment row.
    pub fn write_segment(&mut self, segment: &RoutedSegment) -> Result<()> {
        self.write_int(segment.number)?;
        self.write_tab()?;
        self.write_int(segment.outseg)?;
        self.write_tab()?;
        self.write_int(segment.source)?;
        self.write_tab()?;
        self.write_int(segment.reach_count)?;
        self.write_tab()?;
        self.write_int(segment.first_reach)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Header plus every reach of a network.
    pub fn write_reaches(&mut self, network: &ReachNetwork) -> Result<()> {
        self.write_reach_header()?;
        for reach in network.reaches() {
            self.write_reach(reach)?;
        }
        Ok(())
    }

    /// Header plus every segment of a network.
    pub fn write_segments(&mut self, network: &ReachNetwork) -> Result<()> {
        self.write_segment_header()?;
        for segment in network.segments() {
            self.write_segment(segment)?;
        }
        Ok(())
    }

    /// Header plus one row per node whose model bottom was lowered.
    pub fn write_lowered_bottoms(&mut self, bottoms: &BTreeMap<usize, f64>) -> Result<()> {
        self.write_header(BOTTOM_COLUMNS)?;
        for (&node, &bottom) in bottoms {
            self.write_int(node)?;
            self.write_tab()?;
            self.write_float(bottom)?;
            self.writer.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::reaches::Reach;
    use crate::commands::renumber::ReachTarget;
    use crate::grid::CellId;
    use crate::interval::ArcInterval;

    fn sample() -> RoutedReach {
        RoutedReach {
            id: 3,
            segment_number: 2,
            reach: Reach {
                segment_id: 1042,
                node: 7,
                cell: CellId { row: 1, col: 2 },
                seqno: 1,
                points: Vec::new(),
                arc: ArcInterval::new(0.0, 100.0),
                length: 100.0,
                elevation_up: 50.0,
                elevation_down: 40.0,
                strtop: 45.0,
                width: 2.5,
                slope: 0.1,
            },
            target: ReachTarget::Reach(4),
            layer: None,
        }
    }

    #[test]
    fn test_write_reach() {
        let mut output = Vec::new();
        {
            let mut writer = ReachWriter::new(&mut output);
            writer.write_reach(&sample()).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "3\t2\t1\t1042\t7\t\t1\t2\t100.0\t45.0\t0.1\t2.5\t50.0\t40.0\t4\n"
        );
    }

    #[test]
    fn test_write_reach_with_layer_and_outlet() {
        let mut reach = sample();
        reach.layer = Some(0);
        reach.target = ReachTarget::Outlet;
        let mut output = Vec::new();
        {
            let mut writer = ReachWriter::new(&mut output);
            writer.write_reach(&reach).unwrap();
            writer.flush().unwrap();
        }
        let line = String::from_utf8(output).unwrap();
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(fields.len(), REACH_COLUMNS.len());
        assert_eq!(fields[5], "0");
        assert_eq!(fields[14], "0");
    }

    #[test]
    fn test_write_segment() {
        let mut output = Vec::new();
        {
            let mut writer = ReachWriter::new(&mut output);
            writer.write_segment_header().unwrap();
            writer
                .write_segment(&RoutedSegment {
                    number: 1,
                    source: 1042,
                    outseg: 0,
                    first_reach: 1,
                    reach_count: 3,
                })
                .unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "nseg\toutseg\tsegment_id\tnreach\tfirst_reach\n1\t0\t1042\t3\t1\n"
        );
    }

    #[test]
    fn test_write_lowered_bottoms() {
        let bottoms: BTreeMap<usize, f64> = [(9, 71.5), (2, 76.0)].into_iter().collect();
        let mut output = Vec::new();
        {
            let mut writer = ReachWriter::new(&mut output);
            writer.write_lowered_bottoms(&bottoms).unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "node\tbotm\n2\t76.0\n9\t71.5\n"
        );
    }
}
