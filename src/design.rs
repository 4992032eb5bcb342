//! Experimental design: samples, the conditions they belong to, and the
//! transcription groups transcripts are organized into.

use std::collections::HashMap;

use crate::error::{Result, ShredderError};

/// Immutable layout shared by every sampler group.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    num_transcripts: usize,
    condition_names: Vec<String>,
    /// Condition of each sample.
    condition: Vec<usize>,
    /// Samples of each condition.
    condition_samples: Vec<Vec<usize>>,
    /// Transcripts of each transcription group.
    tgroup_tids: Vec<Vec<usize>>,
    /// Transcription groups with more than one transcript.
    spliced_tgroups: Vec<usize>,
}

impl Design {
    pub fn builder(num_transcripts: usize) -> DesignBuilder {
        DesignBuilder {
            num_transcripts,
            condition_index: HashMap::new(),
            condition_names: Vec::new(),
            condition: Vec::new(),
            tgroup_tids: Vec::new(),
        }
    }

    pub fn num_transcripts(&self) -> usize {
        self.num_transcripts
    }

    pub fn num_samples(&self) -> usize {
        self.condition.len()
    }

    pub fn num_conditions(&self) -> usize {
        self.condition_samples.len()
    }

    pub fn condition_names(&self) -> &[String] {
        &self.condition_names
    }

    pub fn condition_of(&self, sample: usize) -> usize {
        self.condition[sample]
    }

    pub fn conditions(&self) -> &[usize] {
        &self.condition
    }

    pub fn samples_of(&self, condition: usize) -> &[usize] {
        &self.condition_samples[condition]
    }

    pub fn tgroups(&self) -> &[Vec<usize>] {
        &self.tgroup_tids
    }

    pub fn spliced_tgroups(&self) -> &[usize] {
        &self.spliced_tgroups
    }

    pub fn num_spliced(&self) -> usize {
        self.spliced_tgroups.len()
    }

    /// Transcripts of the `j`-th spliced transcription group.
    pub fn spliced_tids(&self, j: usize) -> &[usize] {
        &self.tgroup_tids[self.spliced_tgroups[j]]
    }

    /// `(spliced group, position)` of every transcript that belongs to a spliced group.
    pub fn splice_positions(&self) -> Vec<Option<(usize, usize)>> {
        let mut positions = vec![None; self.num_transcripts];
        for j in 0..self.num_spliced() {
            for (k, &tid) in self.spliced_tids(j).iter().enumerate() {
                positions[tid] = Some((j, k));
            }
        }
        positions
    }
}

/// Collects samples and transcription groups, then validates them.
#[derive(Debug, Clone)]
pub struct DesignBuilder {
    num_transcripts: usize,
    condition_index: HashMap<String, usize>,
    condition_names: Vec<String>,
    condition: Vec<usize>,
    tgroup_tids: Vec<Vec<usize>>,
}

impl DesignBuilder {
    /// Registers a sample and returns its index. Conditions are numbered in
    /// order of first appearance.
    pub fn add_sample(&mut self, condition_name: &str) -> usize {
        let next = self.condition_names.len();
        let c = *self
            .condition_index
            .entry(condition_name.to_string())
            .or_insert(next);
        if c == next {
            self.condition_names.push(condition_name.to_string());
        }
        self.condition.push(c);
        self.condition.len() - 1
    }

    pub fn add_tgroup(&mut self, tids: Vec<usize>) -> &mut Self {
        self.tgroup_tids.push(tids);
        self
    }

    /// Replaces the transcription groups; transcripts not listed get a
    /// singleton group of their own.
    pub fn tgroups(mut self, tgroups: Vec<Vec<usize>>) -> Self {
        self.tgroup_tids = tgroups;
        self
    }

    pub fn build(mut self) -> Result<Design> {
        if self.condition.is_empty() {
            return Err(ShredderError::InvalidConfig(
                "design has no samples".to_string(),
            ));
        }

        let mut seen = vec![false; self.num_transcripts];
        for tids in &self.tgroup_tids {
            if tids.is_empty() {
                return Err(ShredderError::InvalidConfig(
                    "empty transcription group".to_string(),
                ));
            }
            for &tid in tids {
                if tid >= self.num_transcripts {
                    return Err(ShredderError::InvalidConfig(format!(
                        "transcript {tid} out of range for {} transcripts",
                        self.num_transcripts
                    )));
                }
                if std::mem::replace(&mut seen[tid], true) {
                    return Err(ShredderError::InvalidConfig(format!(
                        "transcript {tid} belongs to more than one transcription group"
                    )));
                }
            }
        }
        let singletons: Vec<Vec<usize>> = (0..self.num_transcripts)
            .filter(|&tid| !seen[tid])
            .map(|tid| vec![tid])
            .collect();
        self.tgroup_tids.extend(singletons);

        let mut condition_samples = vec![Vec::new(); self.condition_names.len()];
        for (sample, &c) in self.condition.iter().enumerate() {
            condition_samples[c].push(sample);
        }
        let spliced_tgroups = self
            .tgroup_tids
            .iter()
            .enumerate()
            .filter(|(_, tids)| tids.len() > 1)
            .map(|(i, _)| i)
            .collect();

        Ok(Design {
            num_transcripts: self.num_transcripts,
            condition_names: self.condition_names,
            condition: self.condition,
            condition_samples,
            tgroup_tids: self.tgroup_tids,
            spliced_tgroups,
        })
    }
}
