//! Point cloud decoders for the sensor files referenced by `sample_data`.
//!
//! Two on-disk formats are supported:
//!
//! - PCD v0.7 (`# .PCD` / `VERSION` header, `DATA ascii` or `DATA binary`),
//!   restricted to scalar f32 fields. Used by the radar files and by
//!   `.pcd` lidar files.
//! - Packed little-endian f32 records of 5 channels
//!   (`x, y, z, intensity, timestamp`) for `.bin` lidar payloads.
//!
//! Decoded clouds are a channels x points matrix, one column per point.
//! Channels 0..2 are always x/y/z in the sensor/ego frame. For radar,
//! channel [`RCS_CHANNEL`] is the radar cross-section in dBsm.

use std::io::{self, ErrorKind};
use std::path::Path;

/// Channel index of the radar cross-section (dBsm) in decoded radar clouds.
pub const RCS_CHANNEL: usize = 6;

/// Channel count of packed lidar `.bin` records.
pub const LIDAR_PACKED_CHANNELS: usize = 5;

/// A decoded cloud: `channels` rows by `points` columns, row-major.
#[derive(Debug, Clone)]
pub struct PointMatrix {
    channels: usize,
    points: usize,
    data: Vec<f32>,
}

impl PointMatrix {
    pub fn new(channels: usize, points: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), channels * points);
        Self {
            channels,
            points,
            data,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// One whole channel (all points).
    pub fn channel(&self, c: usize) -> &[f32] {
        &self.data[c * self.points..(c + 1) * self.points]
    }

    pub fn get(&self, c: usize, p: usize) -> f32 {
        self.data[c * self.points + p]
    }

    /// (x, y, z) of one point.
    pub fn position(&self, p: usize) -> [f32; 3] {
        [self.get(0, p), self.get(1, p), self.get(2, p)]
    }
}

#[cold]
fn bad(msg: &str) -> io::Error {
    io::Error::new(ErrorKind::InvalidData, msg)
}

/// Read a lidar cloud. PCD files are detected by header; anything else is
/// decoded as packed 5xf32 records.
pub fn read_lidar_file<P: AsRef<Path>>(path: P) -> io::Result<PointMatrix> {
    let bytes = std::fs::read(path)?;
    if looks_like_pcd(&bytes) {
        parse_pcd_bytes(&bytes)
    } else {
        parse_packed_f32_bytes(&bytes, LIDAR_PACKED_CHANNELS)
    }
}

/// Read a radar cloud (always PCD). The decoded matrix must be deep
/// enough to carry [`RCS_CHANNEL`].
pub fn read_radar_file<P: AsRef<Path>>(path: P) -> io::Result<PointMatrix> {
    let bytes = std::fs::read(path)?;
    let matrix = parse_pcd_bytes(&bytes)?;
    if !matrix.is_empty() && matrix.channels() <= RCS_CHANNEL {
        return Err(bad("radar cloud too shallow for RCS channel"));
    }
    Ok(matrix)
}

fn looks_like_pcd(bytes: &[u8]) -> bool {
    bytes.starts_with(b"# .PCD") || bytes.starts_with(b"VERSION")
}

/// Decode a tightly packed little-endian f32 block into a matrix.
///
/// The byte length must be a whole number of `channels`-wide records.
pub fn parse_packed_f32_bytes(bytes: &[u8], channels: usize) -> io::Result<PointMatrix> {
    let record = channels * 4;
    if record == 0 {
        return Err(bad("packed decode needs at least one channel"));
    }
    if bytes.len() % record != 0 {
        return Err(bad("packed payload is not a whole number of records"));
    }
    let points = bytes.len() / record;

    // Point-major on disk, channel-major in memory.
    let mut data = vec![0.0f32; channels * points];

    #[cfg(target_endian = "little")]
    if let Ok(flat) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
        // Fast path when the read buffer happens to be 4-aligned.
        for (p, rec) in flat.chunks_exact(channels).enumerate() {
            for (c, &v) in rec.iter().enumerate() {
                data[c * points + p] = v;
            }
        }
        return Ok(PointMatrix::new(channels, points, data));
    }

    for (p, rec) in bytes.chunks_exact(record).enumerate() {
        for (c, v) in rec.chunks_exact(4).enumerate() {
            data[c * points + p] = f32::from_le_bytes([v[0], v[1], v[2], v[3]]);
        }
    }
    Ok(PointMatrix::new(channels, points, data))
}

struct PcdHeader {
    fields: usize,
    points: usize,
    binary: bool,
    header_len: usize,
}

fn parse_pcd_header(bytes: &[u8]) -> io::Result<PcdHeader> {
    let mut fields: Option<usize> = None;
    let mut sizes_ok = true;
    let mut types_ok = true;
    let mut counts_ok = true;
    let mut width: Option<usize> = None;
    let mut height: usize = 1;
    let mut points: Option<usize> = None;
    let mut offset = 0usize;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let line_end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| bad("PCD header has no DATA line"))?;
        let line = std::str::from_utf8(&rest[..line_end])
            .map_err(|_| bad("PCD header is not UTF-8"))?
            .trim_end_matches('\r');
        offset += line_end + 1;

        let mut parts = line.split_ascii_whitespace();
        let Some(key) = parts.next() else { continue };
        match key {
            "#" | "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => fields = Some(parts.count()),
            "SIZE" => sizes_ok = parts.all(|s| s == "4"),
            "TYPE" => types_ok = parts.all(|t| t == "F"),
            "COUNT" => counts_ok = parts.all(|c| c == "1"),
            "WIDTH" => {
                width = Some(parts.next().and_then(|w| w.parse().ok()).ok_or_else(|| bad("bad PCD WIDTH"))?)
            }
            "HEIGHT" => {
                height = parts.next().and_then(|h| h.parse().ok()).ok_or_else(|| bad("bad PCD HEIGHT"))?
            }
            "POINTS" => {
                points = Some(parts.next().and_then(|p| p.parse().ok()).ok_or_else(|| bad("bad PCD POINTS"))?)
            }
            "DATA" => {
                let format = parts.next().ok_or_else(|| bad("bad PCD DATA line"))?;
                let binary = match format {
                    "binary" => true,
                    "ascii" => false,
                    _ => return Err(bad("unsupported PCD DATA format")),
                };
                let fields = fields.ok_or_else(|| bad("PCD header missing FIELDS"))?;
                if !sizes_ok || !types_ok {
                    return Err(bad("only scalar f32 PCD fields are supported"));
                }
                if !counts_ok {
                    return Err(bad("PCD COUNT > 1 is not supported"));
                }
                let points = match (points, width) {
                    (Some(p), _) => p,
                    (None, Some(w)) => w * height,
                    (None, None) => return Err(bad("PCD header missing POINTS/WIDTH")),
                };
                return Ok(PcdHeader {
                    fields,
                    points,
                    binary,
                    header_len: offset,
                });
            }
            _ => return Err(bad("unknown PCD header key")),
        }
    }
    Err(bad("PCD header has no DATA line"))
}

/// Parse a whole PCD file (header + payload) from a byte slice.
pub fn parse_pcd_bytes(bytes: &[u8]) -> io::Result<PointMatrix> {
    let header = parse_pcd_header(bytes)?;
    let payload = &bytes[header.header_len..];
    let channels = header.fields;
    let points = header.points;

    let mut data = vec![0.0f32; channels * points];
    if header.binary {
        let want = channels * points * 4;
        if payload.len() < want {
            return Err(bad("truncated PCD binary payload"));
        }
        for (p, rec) in payload[..want].chunks_exact(channels * 4).enumerate() {
            for (c, v) in rec.chunks_exact(4).enumerate() {
                data[c * points + p] = f32::from_le_bytes([v[0], v[1], v[2], v[3]]);
            }
        }
    } else {
        let text = std::str::from_utf8(payload).map_err(|_| bad("PCD ascii payload is not UTF-8"))?;
        let mut p = 0usize;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if p >= points {
                return Err(bad("PCD ascii payload has more rows than POINTS"));
            }
            let mut c = 0usize;
            for value in line.split_ascii_whitespace() {
                if c >= channels {
                    return Err(bad("PCD ascii row has more values than FIELDS"));
                }
                data[c * points + p] = value
                    .parse::<f32>()
                    .map_err(|_| bad("PCD ascii payload has a non-numeric value"))?;
                c += 1;
            }
            if c != channels {
                return Err(bad("PCD ascii row has fewer values than FIELDS"));
            }
            p += 1;
        }
        if p != points {
            return Err(bad("truncated PCD ascii payload"));
        }
    }
    Ok(PointMatrix::new(channels, points, data))
}
