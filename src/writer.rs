/*!
# Draw Writers

The sampling engine reports its output through the [`Writer`] callback protocol: one
announcement of the column names, then any number of state vectors, bulk matrices and free-text
messages. [`ArrayWriter`] turns that stream into writes against one chain of a shared output
array of shape `(columns, chains, draws)`.

Each writer holds a mutable view of a single chain, so several writers can be driven from
different threads without any locking. The writer owns the columns `[offset, columns)`; the
columns before `offset` (chain and draw identifiers) are filled by the caller. The first `skip`
elements of every incoming vector, and the first `skip` rows of every incoming matrix, are
discarded.

## Example

```rust
use ndarray::{s, Array3, Axis};
use slimp::writer::{ArrayWriter, Writer};

let mut array = Array3::<f64>::zeros((3, 2, 4));
let chain_view = array.index_axis_mut(Axis(1), 1);
let mut writer = ArrayWriter::with_offset(chain_view, 1, 1, 2);

writer.write_state(&[42.0, 43.0, 1.0, 2.0])?;
writer.write_state(&[42.0, 43.0, 3.0, 4.0])?;
assert_eq!(writer.draw(), 2);
drop(writer);

assert_eq!(array.slice(s![1, 1, ..]).to_vec(), vec![1.0, 3.0, 0.0, 0.0]);
assert_eq!(array.slice(s![2, 1, ..]).to_vec(), vec![2.0, 4.0, 0.0, 0.0]);
# Ok::<(), slimp::error::Error>(())
```
*/

use ndarray::{s, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Callback protocol of the sampling engine.
///
/// Every method defaults to doing nothing, which is the behavior the engine expects from sinks
/// nobody listens to.
pub trait Writer {
    /// Announces the names of the values in every following state.
    fn write_names(&mut self, _names: &[String]) -> Result<()> {
        Ok(())
    }

    /// One draw: the full vector of values.
    fn write_state(&mut self, _values: &[f64]) -> Result<()> {
        Ok(())
    }

    /// A block of draws with parameters in the rows and draws in the columns.
    fn write_matrix(&mut self, _values: ArrayView2<f64>) -> Result<()> {
        Ok(())
    }

    /// Free-text message attached to the current draw.
    fn write_message(&mut self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Writer discarding everything it receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullWriter;

impl Writer for NullWriter {}

/// How a writer reacts to the announced column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamesPolicy {
    /// Names are recorded as metadata without any size check.
    Informative,
    /// After dropping `skip` leading names, the count must equal the writer's column span.
    Checked,
}

/// Position of a writer in its chain.
///
/// `draw` only ever increases and never exceeds the number of draws of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: usize,
    pub skip: usize,
    pub draw: usize,
}

impl Cursor {
    pub fn new(offset: usize, skip: usize) -> Self {
        Self {
            offset,
            skip,
            draw: 0,
        }
    }

    /// Number of columns written per draw in a target with `columns` columns.
    fn span(&self, columns: usize) -> Result<usize> {
        columns.checked_sub(self.offset).ok_or_else(|| {
            Error::InvalidShape(format!(
                "column offset {} beyond the {columns} columns of the target",
                self.offset
            ))
        })
    }

    /// Checks that a source of `len` elements fills exactly the span after skipping.
    fn check_len(&self, what: &'static str, columns: usize, len: usize) -> Result<()> {
        let expected = self.span(columns)?;
        if len < self.skip || len - self.skip != expected {
            return Err(Error::ShapeMismatch {
                what,
                expected,
                actual: len.saturating_sub(self.skip),
            });
        }
        Ok(())
    }

    fn check_capacity(&self, chain: usize, draws: usize, capacity: usize) -> Result<()> {
        if self.draw + draws > capacity {
            return Err(Error::DrawOutOfRange {
                chain,
                draw: self.draw + draws - 1,
                capacity,
            });
        }
        Ok(())
    }

    /// Writes one state into `target` (shape `(columns, draws)`) and returns the advanced
    /// cursor. Nothing is written if the state does not fit.
    pub fn apply_state(
        self,
        target: &mut ArrayViewMut2<f64>,
        chain: usize,
        values: &[f64],
    ) -> Result<Cursor> {
        let (columns, capacity) = target.dim();
        self.check_len("state", columns, values.len())?;
        self.check_capacity(chain, 1, capacity)?;

        target
            .slice_mut(s![self.offset.., self.draw])
            .assign(&ArrayView1::from(&values[self.skip..]));
        Ok(Cursor {
            draw: self.draw + 1,
            ..self
        })
    }

    /// Writes a parameter-major block of draws into `target`, column `j` of the block going to
    /// draw `draw + j`. The whole block is validated before anything is written.
    pub fn apply_matrix(
        self,
        target: &mut ArrayViewMut2<f64>,
        chain: usize,
        values: ArrayView2<f64>,
    ) -> Result<Cursor> {
        let (columns, capacity) = target.dim();
        let (rows, draws) = values.dim();
        self.check_len("values", columns, rows)?;
        self.check_capacity(chain, draws, capacity)?;

        target
            .slice_mut(s![self.offset.., self.draw..self.draw + draws])
            .assign(&values.slice(s![self.skip.., ..]));
        Ok(Cursor {
            draw: self.draw + draws,
            ..self
        })
    }
}

/// Writer of one chain of an output array of shape `(columns, chains, draws)`.
#[derive(Debug)]
pub struct ArrayWriter<'a> {
    target: ArrayViewMut2<'a, f64>,
    chain: usize,
    cursor: Cursor,
    policy: NamesPolicy,
    names: Vec<String>,
    messages: BTreeMap<usize, Vec<String>>,
}

impl<'a> ArrayWriter<'a> {
    /// Creates a writer owning every column of `target`, the `(columns, draws)` view of chain
    /// `chain`. Announced names are checked against the column count.
    pub fn new(target: ArrayViewMut2<'a, f64>, chain: usize, skip: usize) -> Self {
        Self {
            target,
            chain,
            cursor: Cursor::new(0, skip),
            policy: NamesPolicy::Checked,
            names: Vec::new(),
            messages: BTreeMap::new(),
        }
    }

    /// Creates a writer owning the columns `[offset, columns)` of `target`. Announced names
    /// are informative only, since the caller fills the columns before `offset`.
    pub fn with_offset(
        target: ArrayViewMut2<'a, f64>,
        chain: usize,
        offset: usize,
        skip: usize,
    ) -> Self {
        Self {
            cursor: Cursor::new(offset, skip),
            policy: NamesPolicy::Informative,
            ..Self::new(target, chain, skip)
        }
    }

    pub fn names_policy(mut self, policy: NamesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn chain(&self) -> usize {
        self.chain
    }

    /// Index of the next draw to be written.
    pub fn draw(&self) -> usize {
        self.cursor.draw
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Names as announced by the engine, empty before the announcement.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Messages grouped by the draw that was current when they arrived.
    pub fn messages(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.messages
    }
}

impl Writer for ArrayWriter<'_> {
    fn write_names(&mut self, names: &[String]) -> Result<()> {
        if self.policy == NamesPolicy::Checked {
            self.cursor
                .check_len("names", self.target.nrows(), names.len())?;
        }
        self.names = names.to_vec();
        Ok(())
    }

    fn write_state(&mut self, values: &[f64]) -> Result<()> {
        self.cursor = self
            .cursor
            .apply_state(&mut self.target, self.chain, values)?;
        Ok(())
    }

    fn write_matrix(&mut self, values: ArrayView2<f64>) -> Result<()> {
        self.cursor = self
            .cursor
            .apply_matrix(&mut self.target, self.chain, values)?;
        Ok(())
    }

    fn write_message(&mut self, message: &str) -> Result<()> {
        self.messages
            .entry(self.cursor.draw)
            .or_default()
            .push(message.to_string());
        Ok(())
    }
}

/// Creates one writer per chain of `array`, each owning the columns `[offset, columns)`.
pub fn chain_writers(array: &mut Array3<f64>, offset: usize, skip: usize) -> Vec<ArrayWriter<'_>> {
    array
        .axis_iter_mut(Axis(1))
        .enumerate()
        .map(|(chain, view)| ArrayWriter::with_offset(view, chain, offset, skip))
        .collect()
}
