//! Configuration of a linear system and the sizing of its contribution buffers.
use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Settings for assembling one linear system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblySettings {
    /// Name of the linear system, used in log messages.
    pub name: String,
    /// Number of degrees of freedom per node. Node `n` owns rows `num_dof * n .. num_dof * (n + 1)`.
    pub num_dof: usize,
    /// Number of right-hand sides sharing the matrix. Values above one require `num_dof == 1`.
    pub num_rhs_components: usize,
    /// Number of contribution batches per assembly cycle, each with its own buffer partition.
    pub num_partitions: usize,
    /// Assemble by a global sort of all staged entries instead of binning them by row.
    pub sort: bool,
    /// Give rows without any contribution a unit diagonal and a zero rhs.
    pub fill_unfilled_rows: bool,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            name: String::from("linear system"),
            num_dof: 1,
            num_rhs_components: 1,
            num_partitions: 1,
            sort: false,
            fill_unfilled_rows: true,
        }
    }
}

impl AssemblySettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_num_dof(self, num_dof: usize) -> Self {
        Self { num_dof, ..self }
    }

    pub fn with_num_rhs_components(self, num_rhs_components: usize) -> Self {
        Self {
            num_rhs_components,
            ..self
        }
    }

    pub fn with_num_partitions(self, num_partitions: usize) -> Self {
        Self { num_partitions, ..self }
    }

    pub fn with_sort(self, sort: bool) -> Self {
        Self { sort, ..self }
    }

    pub fn with_fill_unfilled_rows(self, fill_unfilled_rows: bool) -> Self {
        Self {
            fill_unfilled_rows,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), AssemblyError> {
        if self.num_dof == 0 {
            return Err(AssemblyError::InvalidSettings("num_dof must be positive".into()));
        }
        if self.num_partitions == 0 {
            return Err(AssemblyError::InvalidSettings("num_partitions must be positive".into()));
        }
        if self.num_rhs_components == 0 {
            return Err(AssemblyError::InvalidSettings(
                "num_rhs_components must be positive".into(),
            ));
        }
        if self.num_rhs_components > 1 && self.num_dof != 1 {
            return Err(AssemblyError::InvalidSettings(format!(
                "{} rhs components require a scalar matrix (num_dof == 1), got num_dof == {}",
                self.num_rhs_components, self.num_dof
            )));
        }
        Ok(())
    }
}

/// The rows owned by this rank and the admissible global columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLayout {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl SystemLayout {
    /// A square system whose columns span `0 .. num_global_rows`.
    pub fn square(rows: Range<usize>, num_global_rows: usize) -> Self {
        Self {
            rows,
            cols: 0..num_global_rows,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn validate(&self) -> Result<(), AssemblyError> {
        if self.rows.start > self.rows.end || self.cols.start > self.cols.end {
            return Err(AssemblyError::InvalidSettings(format!(
                "empty or inverted ranges in layout {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Upper bounds on the number of entries each contribution batch writes.
///
/// One partition is reserved per batch. A batch loops over `num_entities` entities (elements,
/// faces, edges or nodes) that each contribute a dense block coupling `nodes_per_entity` nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSizing {
    batches: Vec<(usize, usize)>,
    extra_matrix_entries: Vec<usize>,
    extra_rhs_entries: Vec<usize>,
}

impl PartitionSizing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partition for a batch of `num_entities` entities with `nodes_per_entity` nodes each.
    pub fn with_partition(mut self, num_entities: usize, nodes_per_entity: usize) -> Self {
        self.batches.push((num_entities, nodes_per_entity));
        self.extra_matrix_entries.push(0);
        self.extra_rhs_entries.push(0);
        self
    }

    /// Add a partition with explicitly given capacities.
    pub fn with_capacities(mut self, matrix_entries: usize, rhs_entries: usize) -> Self {
        self.batches.push((0, 0));
        self.extra_matrix_entries.push(matrix_entries);
        self.extra_rhs_entries.push(rhs_entries);
        self
    }

    pub fn num_partitions(&self) -> usize {
        self.batches.len()
    }

    /// Matrix entry capacity of every partition.
    pub fn matrix_capacities(&self, num_dof: usize) -> Vec<usize> {
        self.batches
            .iter()
            .zip(&self.extra_matrix_entries)
            .map(|(&(num_entities, nodes_per_entity), extra)| {
                let block = nodes_per_entity * num_dof;
                num_entities * block * block + extra
            })
            .collect()
    }

    /// Rhs entry capacity of every partition, per rhs component.
    pub fn rhs_capacities(&self, num_dof: usize) -> Vec<usize> {
        self.batches
            .iter()
            .zip(&self.extra_rhs_entries)
            .map(|(&(num_entities, nodes_per_entity), extra)| num_entities * nodes_per_entity * num_dof + extra)
            .collect()
    }

    pub fn total_matrix_capacity(&self, num_dof: usize) -> usize {
        self.matrix_capacities(num_dof).iter().sum()
    }

    pub fn total_rhs_capacity(&self, num_dof: usize) -> usize {
        self.rhs_capacities(num_dof).iter().sum()
    }
}
