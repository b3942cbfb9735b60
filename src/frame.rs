use std::io::{ErrorKind, Read};

use crate::error::{AvgQError, Result};

/// Bytes per sample value on the wire (float32)
pub const BYTES_PER_VALUE: usize = 4;

/// Shape of one binary sample block
///
/// A block is `points` rows of `f32` values with no padding or separators.
/// Each row holds the optional x-axis value first, then
/// `channels * itemsize` sample values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub points: usize,
    pub channels: usize,
    pub itemsize: usize,
    pub has_xdata: bool,
}

impl FrameLayout {
    pub fn new(points: usize, channels: usize) -> Self {
        FrameLayout {
            points,
            channels,
            itemsize: 1,
            has_xdata: false,
        }
    }

    pub fn with_xdata(mut self, has_xdata: bool) -> Self {
        self.has_xdata = has_xdata;
        self
    }

    pub fn with_itemsize(mut self, itemsize: usize) -> Self {
        self.itemsize = itemsize;
        self
    }

    /// Sample values per row, excluding the x axis
    pub fn data_columns(&self) -> usize {
        self.channels * self.itemsize
    }

    /// Values per row on the wire
    pub fn columns(&self) -> usize {
        self.data_columns() + usize::from(self.has_xdata)
    }

    pub fn value_count(&self) -> usize {
        self.points * self.columns()
    }

    /// Exact size of the block in bytes
    pub fn byte_len(&self) -> usize {
        self.value_count() * BYTES_PER_VALUE
    }
}

/// Decoded sample block
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub xdata: Option<Vec<f32>>,
    /// Row-major `points × data_columns` values
    pub data: Vec<f32>,
}

/// Encodes a block into one contiguous buffer
///
/// `data` is row-major with `layout.data_columns()` values per row;
/// `xdata` must be given exactly when `layout.has_xdata` is set.
///
/// # Examples
///
/// ```rust
/// use avgq::frame::{encode, decode, FrameLayout};
///
/// let layout = FrameLayout::new(2, 3).with_xdata(true);
/// let xdata = [0.0, 0.01];
/// let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
///
/// let bytes = encode(&layout, Some(&xdata[..]), &data)?;
/// assert_eq!(bytes.len(), layout.byte_len());
/// assert_eq!(bytes.len(), 2 * (1 + 3) * 4);
///
/// let frame = decode(&layout, &bytes)?;
/// assert_eq!(frame.xdata.as_deref(), Some(&xdata[..]));
/// assert_eq!(frame.data, data);
/// # Ok::<(), avgq::AvgQError>(())
/// ```
pub fn encode(layout: &FrameLayout, xdata: Option<&[f32]>, data: &[f32]) -> Result<Vec<u8>> {
    let expected = layout.points * layout.data_columns();
    if data.len() != expected {
        return Err(AvgQError::FrameSize {
            expected,
            actual: data.len(),
        });
    }
    match (layout.has_xdata, xdata) {
        (true, Some(x)) if x.len() != layout.points => {
            return Err(AvgQError::FrameSize {
                expected: layout.points,
                actual: x.len(),
            });
        }
        (true, None) => {
            return Err(AvgQError::FrameSize {
                expected: layout.points,
                actual: 0,
            });
        }
        _ => {}
    }

    let mut buf = Vec::with_capacity(layout.byte_len());
    let columns = layout.data_columns();
    for point in 0..layout.points {
        if layout.has_xdata {
            if let Some(x) = xdata {
                buf.extend_from_slice(&x[point].to_ne_bytes());
            }
        }
        for value in &data[point * columns..(point + 1) * columns] {
            buf.extend_from_slice(&value.to_ne_bytes());
        }
    }
    Ok(buf)
}

/// Decodes a block of exactly `layout.byte_len()` bytes
pub fn decode(layout: &FrameLayout, bytes: &[u8]) -> Result<Frame> {
    if bytes.len() != layout.byte_len() {
        return Err(AvgQError::UnexpectedEof {
            expected: layout.byte_len(),
            actual: bytes.len(),
        });
    }

    let mut xdata = layout.has_xdata.then(|| Vec::with_capacity(layout.points));
    let mut data = Vec::with_capacity(layout.points * layout.data_columns());
    let columns = layout.columns();

    for (i, chunk) in bytes.chunks_exact(BYTES_PER_VALUE).enumerate() {
        let value = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        match xdata.as_mut() {
            Some(x) if i % columns == 0 => x.push(value),
            _ => data.push(value),
        }
    }

    Ok(Frame { xdata, data })
}

/// Reads exactly one block from a stream
///
/// Pipes deliver partial reads; this keeps reading until the full byte
/// count has arrived. End of stream before that is an error.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R, layout: &FrameLayout) -> Result<Frame> {
    let expected = layout.byte_len();
    let mut buf = vec![0u8; expected];
    let mut filled = 0;

    while filled < expected {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(AvgQError::UnexpectedEof {
                    expected,
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    decode(layout, &buf)
}
