/// An item to keep clear of when splitting a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// A single point, e.g. a breakpoint
    Point(i64),
    /// An explicit `(start, end)` range
    Range(i64, i64),
}

impl Exclusion {
    /// Range covered once `margin` is added on both sides
    pub fn expand(&self, margin: i64) -> (i64, i64) {
        match *self {
            Exclusion::Point(p) => (p - margin, p + margin),
            Exclusion::Range(start, end) => (start - margin, end + margin),
        }
    }
}

impl From<i64> for Exclusion {
    fn from(point: i64) -> Self {
        Exclusion::Point(point)
    }
}

impl From<(i64, i64)> for Exclusion {
    fn from((start, end): (i64, i64)) -> Self {
        Exclusion::Range(start, end)
    }
}

/// Lazy sequence of the sub-ranges of `[start, end)` that avoid every exclusion
///
/// Created by [`clean_sections`]. Sections come out in increasing order,
/// never overlap and are never empty.
#[derive(Debug, Clone)]
pub struct CleanSections {
    exclusions: std::vec::IntoIter<(i64, i64)>,
    cursor: i64,
    end: i64,
    done: bool,
}

impl Iterator for CleanSections {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        if self.done {
            return None;
        }
        for (lo, hi) in self.exclusions.by_ref() {
            if lo >= self.end {
                // 按 lo 排序，后面的都在范围外
                break;
            }
            if self.cursor < lo {
                let section = (self.cursor, lo);
                self.cursor = hi;
                return Some(section);
            } else if self.cursor < hi {
                self.cursor = hi;
            }
        }
        self.done = true;
        if self.cursor < self.end {
            Some((self.cursor, self.end))
        } else {
            None
        }
    }
}

/// Splits `[start_point, end_point)` into sections clear of all exclusions
///
/// Each exclusion is widened by `margin_points` on both sides. Overlapping
/// exclusions and exclusions reaching past either end are allowed.
///
/// # Examples
///
/// ```rust
/// use avgq::segments::{clean_sections, Exclusion};
///
/// let sections: Vec<_> = clean_sections(0, 1000, [Exclusion::Point(500)], 5).collect();
/// assert_eq!(sections, vec![(0, 495), (505, 1000)]);
/// ```
pub fn clean_sections<I, E>(
    start_point: i64,
    end_point: i64,
    exclusions: I,
    margin_points: i64,
) -> CleanSections
where
    I: IntoIterator<Item = E>,
    E: Into<Exclusion>,
{
    let mut ranges: Vec<(i64, i64)> = exclusions
        .into_iter()
        .map(|e| e.into().expand(margin_points))
        .collect();
    ranges.sort_by_key(|&(lo, _)| lo);

    CleanSections {
        exclusions: ranges.into_iter(),
        cursor: start_point,
        end: end_point,
        done: false,
    }
}

/// Start points of fixed-length windows packed into clean sections
///
/// Within every section, windows of `nr_of_points` start at the section
/// start and advance by `step_points` while they still fit; a step of
/// `None` (or <= 0) makes the windows contiguous.
pub fn fixed_windows<I>(sections: I, nr_of_points: i64, step_points: Option<i64>) -> Vec<i64>
where
    I: IntoIterator<Item = (i64, i64)>,
{
    let step = match step_points {
        Some(step) if step > 0 => step,
        _ => nr_of_points,
    };
    let mut starts = Vec::new();
    if nr_of_points <= 0 {
        return starts;
    }
    for (mut start, end) in sections {
        while start + nr_of_points <= end {
            starts.push(start);
            start += step;
        }
    }
    starts
}
