/*!
# Saving Draws to CSV

Writes an output array of shape `(columns, chains, draws)` with its column names, one row per
draw of every chain, chains one after the other. Since the identifier columns are part of the
array, each row carries its own chain and draw. Enable via the `csv` feature.

```rust
use ndarray::Array3;
use slimp::io::csv::write_csv;

let array = Array3::from_shape_fn((3, 2, 2), |(c, chain, draw)| match c {
    0 => (chain + 1) as f64,
    1 => draw as f64,
    _ => 0.5,
});
let columns = ["chain__", "draw__", "mu"].map(String::from);

let mut out = Vec::new();
write_csv(&mut out, array.view(), &columns)?;
assert_eq!(
    String::from_utf8(out).unwrap(),
    "chain__,draw__,mu\n1,0,0.5\n1,1,0.5\n2,0,0.5\n2,1,0.5\n"
);
# Ok::<(), slimp::error::Error>(())
```
*/

use ndarray::{ArrayView3, Axis};
use std::fs::File;
use std::path::Path;

use crate::actions::{GeneratedQuantities, SampleOutput};
use crate::error::{Error, Result};

/// Writes `array` as CSV to `writer`, with `columns` as header.
pub fn write_csv<W: std::io::Write>(
    writer: W,
    array: ArrayView3<f64>,
    columns: &[String],
) -> Result<()> {
    if columns.len() != array.len_of(Axis(0)) {
        return Err(Error::ShapeMismatch {
            what: "columns",
            expected: array.len_of(Axis(0)),
            actual: columns.len(),
        });
    }

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(columns)?;
    for chain in array.axis_iter(Axis(1)) {
        for draw in chain.axis_iter(Axis(1)) {
            wtr.write_record(draw.iter().map(|v| v.to_string()))?;
        }
    }
    wtr.flush()?;
    Ok(())
}

/// Saves `array` with its column names to the file at `path`.
pub fn save_csv(path: impl AsRef<Path>, array: ArrayView3<f64>, columns: &[String]) -> Result<()> {
    let path = path.as_ref();
    write_csv(File::create(path)?, array, columns)?;
    log::debug!("Saved {} draws to {}", array.len_of(Axis(2)), path.display());
    Ok(())
}

impl SampleOutput {
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        save_csv(path, self.array.view(), &self.columns)
    }
}

impl GeneratedQuantities {
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        save_csv(path, self.array.view(), &self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr3, Array3};
    use std::fs;
    use tempfile::NamedTempFile;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_write_csv_header_only() {
        let array = Array3::<f64>::zeros((2, 3, 0));
        let mut out = Vec::new();
        write_csv(&mut out, array.view(), &names(&["chain__", "draw__"])).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "chain__,draw__");
    }

    #[test]
    fn test_write_csv_rows_follow_chains() {
        // array[column][chain][draw]
        let array = arr3(&[
            [[1.0, 1.0], [2.0, 2.0]],
            [[0.0, 1.0], [0.0, 1.0]],
            [[0.25, -1.5], [10.0, 20.0]],
        ]);
        let mut out = Vec::new();
        write_csv(&mut out, array.view(), &names(&["chain__", "draw__", "x"])).unwrap();
        let expected = "\
chain__,draw__,x
1,0,0.25
1,1,-1.5
2,0,10
2,1,20";
        assert_eq!(String::from_utf8(out).unwrap().trim(), expected);
    }

    #[test]
    fn test_write_csv_checks_columns() {
        let array = Array3::<f64>::zeros((3, 1, 1));
        let err = write_csv(Vec::new(), array.view(), &names(&["a"])).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                what: "columns",
                expected: 3,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_sample_output_save_csv() -> Result<()> {
        let output = SampleOutput {
            array: arr3(&[[[1.0, 1.0]], [[0.0, 1.0]], [[3.5, 4.5]]]),
            columns: names(&["chain__", "draw__", "mu"]),
            parameters_columns: names(&["mu"]),
        };
        let file = NamedTempFile::new()?;
        output.save_csv(file.path())?;

        let contents = fs::read_to_string(file.path())?;
        let mut rdr = csv::Reader::from_reader(contents.as_bytes());
        assert_eq!(
            rdr.headers()?.iter().collect::<Vec<_>>(),
            vec!["chain__", "draw__", "mu"]
        );
        let records: Vec<csv::StringRecord> = rdr.records().collect::<std::result::Result<_, _>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][2], "4.5");
        Ok(())
    }
}
