/*!
# Streaming samples to CSV

[`CsvSink`] writes every sample in long format, one row per parameter value:

```text
sample,parameter,index,value
0,condition_mean,1.4,0.0125
0,experiment_splice_sigma,,0.5
```

`index` is the position of the value within its parameter, with axes joined
by `.`: `condition.transcript` for condition means,
`group.condition.position` for condition splice proportions, and empty for
scalars. Enable via the `csv` feature.
*/

use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Result, ShredderError};
use crate::io::SampleSink;
use crate::state::ModelState;

pub struct CsvSink<W: Write> {
    writer: Writer<W>,
}

impl CsvSink<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> CsvSink<W> {
    /// Wraps `writer` and writes the header row.
    pub fn new(writer: W) -> Result<Self> {
        let mut writer = Writer::from_writer(writer);
        writer.write_record(["sample", "parameter", "index", "value"])?;
        Ok(Self { writer })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ShredderError::Io(e.into_error()))
    }

    fn row(&mut self, sample: &str, parameter: &str, index: &str, value: impl ToString) -> Result<()> {
        self.writer
            .write_record([sample, parameter, index, &value.to_string()])?;
        Ok(())
    }
}

impl<W: Write> SampleSink for CsvSink<W> {
    fn write(&mut self, sample_num: usize, state: &ModelState) -> Result<()> {
        let s = sample_num.to_string();

        for ((c, tid), &x) in state.condition_mean.indexed_iter() {
            self.row(&s, "condition_mean", &format!("{c}.{tid}"), x)?;
        }
        for (tid, &x) in state.condition_shape.iter().enumerate() {
            self.row(&s, "condition_shape", &tid.to_string(), x)?;
        }
        for (tid, &x) in state.experiment_mean.iter().enumerate() {
            self.row(&s, "experiment_mean", &tid.to_string(), x)?;
        }
        for (j, mu) in state.condition_splice_mu.iter().enumerate() {
            for ((c, k), &x) in mu.indexed_iter() {
                self.row(&s, "condition_splice_mu", &format!("{j}.{c}.{k}"), x)?;
            }
        }
        for (j, sigma) in state.condition_splice_sigma.iter().enumerate() {
            for (k, &x) in sigma.iter().enumerate() {
                self.row(&s, "condition_splice_sigma", &format!("{j}.{k}"), x)?;
            }
        }
        for (j, mu) in state.experiment_splice_mu.iter().enumerate() {
            for (k, &x) in mu.iter().enumerate() {
                self.row(&s, "experiment_splice_mu", &format!("{j}.{k}"), x)?;
            }
        }
        for (i, &x) in state.scale.iter().enumerate() {
            self.row(&s, "sample_scaling", &i.to_string(), x)?;
        }

        let h = state.hyper;
        self.row(&s, "experiment_shape", "", h.experiment_shape)?;
        self.row(&s, "condition_shape_beta", "", h.condition_shape_beta)?;
        self.row(&s, "condition_splice_beta", "", h.condition_splice_beta)?;
        self.row(&s, "experiment_splice_sigma", "", h.experiment_splice_sigma)
    }
}
