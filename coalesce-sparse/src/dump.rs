//! Plain-text dumps of assembled systems for debugging.
use crate::HostCsr;
use nalgebra::{DVector, Scalar};
use std::fmt::LowerExp;
use std::io::{self, Write};

impl<T: LowerExp> HostCsr<T> {
    /// Writes the matrix in MatrixMarket coordinate format with 1-based *global* indices.
    ///
    /// The header dimensions are the global row bound and the column count, so that dumps
    /// from several ranks can be concatenated by hand.
    pub fn write_matrix_market<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "%%MatrixMarket matrix coordinate real general")?;
        writeln!(writer, "% rows {} .. {}", self.row_range().start, self.row_range().end)?;
        writeln!(writer, "{} {} {}", self.row_range().end, self.ncols(), self.nnz())?;
        for (row, col, value) in self.iter() {
            writeln!(writer, "{} {} {:e}", row + 1, col + 1, value)?;
        }
        Ok(())
    }
}

/// Writes a dense rhs block in MatrixMarket array format, prefixed by its first global row.
pub fn write_rhs<T, W>(mut writer: W, first_row: usize, rhs: &DVector<T>) -> io::Result<()>
where
    T: Scalar + LowerExp,
    W: Write,
{
    writeln!(writer, "%%MatrixMarket matrix array real general")?;
    writeln!(writer, "% first row {}", first_row)?;
    writeln!(writer, "{} 1", rhs.len())?;
    for value in rhs.iter() {
        writeln!(writer, "{:e}", value)?;
    }
    Ok(())
}
