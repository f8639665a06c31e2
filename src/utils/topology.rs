//! Topology utilities for spatial computations in HTM.
//!
//! A [`Topology`] describes a fixed-shape N-dimensional grid (the column space or
//! the input space) and maps between flat indices and coordinates. Both row-major
//! (last coordinate varies fastest) and column-major (first coordinate varies
//! fastest) layouts are supported.

use crate::error::{CorticalError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Specifies how boundaries are handled in topological computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WrappingMode {
    /// No wrapping - boundaries are hard limits.
    #[default]
    NoWrap,
    /// Wrap around - space is toroidal.
    Wrap,
}

impl From<bool> for WrappingMode {
    fn from(wrap: bool) -> Self {
        if wrap {
            Self::Wrap
        } else {
            Self::NoWrap
        }
    }
}

/// Coordinate math over a fixed-shape grid.
///
/// # Example
///
/// ```rust
/// use cortical::utils::Topology;
///
/// let topology = Topology::new(&[3, 3], false).unwrap();
/// assert_eq!(topology.index_to_coordinates(5), vec![1, 2]);
/// assert_eq!(topology.coordinates_to_index(&[1, 2]), 5);
///
/// let column_major = Topology::new(&[3, 3], true).unwrap();
/// assert_eq!(column_major.index_to_coordinates(5), vec![2, 1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Topology {
    dimensions: Vec<usize>,
    /// Stride of each dimension in the flat index.
    multiples: Vec<usize>,
    column_major: bool,
}

impl Topology {
    /// Creates a topology for the given shape.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - The shape of the space, one entry per dimension
    /// * `column_major` - If true the first coordinate varies fastest
    pub fn new(dimensions: &[usize], column_major: bool) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(CorticalError::InvalidDimensions(
                "at least one dimension is required".to_string(),
            ));
        }
        if let Some(pos) = dimensions.iter().position(|&d| d == 0) {
            return Err(CorticalError::InvalidDimensions(format!(
                "dimension {pos} has size 0 in {dimensions:?}"
            )));
        }

        let mut multiples = vec![1; dimensions.len()];
        if column_major {
            for i in 1..dimensions.len() {
                multiples[i] = multiples[i - 1] * dimensions[i - 1];
            }
        } else {
            for i in (0..dimensions.len() - 1).rev() {
                multiples[i] = multiples[i + 1] * dimensions[i + 1];
            }
        }

        Ok(Self {
            dimensions: dimensions.to_vec(),
            multiples,
            column_major,
        })
    }

    /// Returns the shape of the space.
    #[inline]
    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    /// Returns the number of dimensions.
    #[inline]
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns whether the first coordinate varies fastest.
    #[inline]
    pub fn is_column_major(&self) -> bool {
        self.column_major
    }

    /// Computes the total number of elements in the space.
    #[inline]
    pub fn num_elements(&self) -> usize {
        self.dimensions.iter().product()
    }

    /// Converts a flat index to multi-dimensional coordinates.
    #[must_use]
    pub fn index_to_coordinates(&self, index: usize) -> Vec<usize> {
        self.dimensions
            .iter()
            .zip(&self.multiples)
            .map(|(&dim, &multiple)| (index / multiple) % dim)
            .collect()
    }

    /// Converts multi-dimensional coordinates to a flat index.
    #[must_use]
    pub fn coordinates_to_index(&self, coordinates: &[usize]) -> usize {
        coordinates
            .iter()
            .zip(&self.multiples)
            .map(|(&coord, &multiple)| coord * multiple)
            .sum()
    }

    /// Computes the neighborhood of an element within a given radius.
    ///
    /// Returns every index of the hypercube of the given radius around `center`,
    /// the center itself included. Without wrapping the hypercube is clipped at the
    /// borders; with wrapping each axis covers at most its full length once, so no
    /// index is reported twice.
    #[must_use]
    pub fn neighborhood(&self, center: usize, radius: usize, wrap: WrappingMode) -> Vec<usize> {
        let center_coords = self.index_to_coordinates(center);

        let ranges: Vec<Vec<usize>> = center_coords
            .iter()
            .zip(&self.dimensions)
            .map(|(&c, &dim)| match wrap {
                WrappingMode::NoWrap => {
                    let lo = c.saturating_sub(radius);
                    let hi = (c + radius).min(dim - 1);
                    (lo..=hi).collect()
                }
                WrappingMode::Wrap => {
                    let (c, dim, r) = (c as i64, dim as i64, radius as i64);
                    let lo = c - r;
                    let hi = (lo + dim - 1).min(c + r);
                    (lo..=hi).map(|v| v.rem_euclid(dim) as usize).collect()
                }
            })
            .collect();

        self.cartesian_indices(&ranges)
    }

    /// Flattens the Cartesian product of per-dimension coordinate ranges.
    fn cartesian_indices(&self, ranges: &[Vec<usize>]) -> Vec<usize> {
        let total: usize = ranges.iter().map(Vec::len).product();
        let mut result = Vec::with_capacity(total);
        if total == 0 {
            return result;
        }

        let mut cursor = vec![0usize; ranges.len()];
        loop {
            let index: usize = cursor
                .iter()
                .enumerate()
                .map(|(dim, &pos)| ranges[dim][pos] * self.multiples[dim])
                .sum();
            result.push(index);

            // Odometer step, last dimension fastest.
            let mut dim = ranges.len();
            loop {
                if dim == 0 {
                    return result;
                }
                dim -= 1;
                cursor[dim] += 1;
                if cursor[dim] < ranges[dim].len() {
                    break;
                }
                cursor[dim] = 0;
            }
        }
    }

    /// Maps a column index to the natural center of its receptive field.
    ///
    /// Columns are spread uniformly over the input space: each column coordinate
    /// `c` in a dimension of size `C` maps to `floor((c + 0.5) * I / C)` in the
    /// matching input dimension of size `I`, clipped to the input bounds.
    ///
    /// # Arguments
    ///
    /// * `column` - The column index
    /// * `columns` - The topology of the column space
    /// * `inputs` - The topology of the input space
    #[must_use]
    pub fn map_column(column: usize, columns: &Topology, inputs: &Topology) -> usize {
        let column_coords = columns.index_to_coordinates(column);

        let input_coords: Vec<usize> = inputs
            .dimensions
            .iter()
            .enumerate()
            .map(|(dim, &input_dim)| {
                let col_coord = column_coords.get(dim).copied().unwrap_or(0) as f64;
                let col_dim = columns.dimensions.get(dim).copied().unwrap_or(1) as f64;
                let input_dim_f = input_dim as f64;

                let mapped = (col_coord / col_dim * input_dim_f + 0.5 * input_dim_f / col_dim) as usize;
                mapped.min(input_dim - 1)
            })
            .collect();

        inputs.coordinates_to_index(&input_coords)
    }
}
