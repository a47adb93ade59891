use nalgebra::{DMatrix, DVector, RowDVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{ProjectionError, Result};

/// Square `dim x dim` matrix applied to query embeddings before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMatrix {
    inner: DMatrix<f32>,
}

impl ProjectionMatrix {
    pub fn identity(dim: usize) -> Self {
        Self {
            inner: DMatrix::identity(dim, dim),
        }
    }

    /// Entries drawn i.i.d. from N(0, 1).
    pub fn random<R: Rng>(dim: usize, rng: &mut R) -> Self {
        Self {
            inner: DMatrix::from_fn(dim, dim, |_, _| rng.sample(StandardNormal)),
        }
    }

    pub fn from_matrix(inner: DMatrix<f32>) -> Result<Self> {
        ProjectionError::check_dim(inner.nrows(), inner.ncols())?;
        Ok(Self { inner })
    }

    pub fn dim(&self) -> usize {
        self.inner.nrows()
    }

    pub fn as_matrix(&self) -> &DMatrix<f32> {
        &self.inner
    }

    pub(crate) fn as_matrix_mut(&mut self) -> &mut DMatrix<f32> {
        &mut self.inner
    }

    pub fn into_inner(self) -> DMatrix<f32> {
        self.inner
    }
}

/// Plain dot-product similarity.
pub fn similarity(query: &DVector<f32>, snippet: &DVector<f32>) -> Result<f32> {
    ProjectionError::check_dim(query.len(), snippet.len())?;
    Ok(query.dot(snippet))
}

/// `snippet · (P q)`: the query is transformed, the snippet is not.
pub fn similarity_with_projection(
    query: &DVector<f32>,
    snippet: &DVector<f32>,
    projection: &ProjectionMatrix,
) -> Result<f32> {
    let dim = projection.dim();
    ProjectionError::check_dim(dim, query.len())?;
    ProjectionError::check_dim(dim, snippet.len())?;
    Ok(snippet.dot(&(projection.as_matrix() * query)))
}

/// Column-wise similarities for aligned pairs: `out[i] = dot(queries[:, i], snippets[:, i])`.
pub fn batch_similarity(
    queries: &DMatrix<f32>,
    snippets: &DMatrix<f32>,
) -> Result<RowDVector<f32>> {
    check_aligned(queries, snippets)?;
    Ok(queries.component_mul(snippets).row_sum())
}

/// Projected similarities for aligned pairs, one matrix product for the whole batch.
pub fn batch_similarity_with_projection(
    queries: &DMatrix<f32>,
    snippets: &DMatrix<f32>,
    projection: &ProjectionMatrix,
) -> Result<RowDVector<f32>> {
    check_aligned(queries, snippets)?;
    ProjectionError::check_dim(projection.dim(), queries.nrows())?;
    let projected = projection.as_matrix() * queries;
    Ok(projected.component_mul(snippets).row_sum())
}

fn check_aligned(queries: &DMatrix<f32>, snippets: &DMatrix<f32>) -> Result<()> {
    ProjectionError::check_dim(queries.nrows(), snippets.nrows())?;
    if queries.ncols() != snippets.ncols() {
        return Err(ProjectionError::InvalidConfig(format!(
            "batch holds {} queries but {} snippets",
            queries.ncols(),
            snippets.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn v(xs: &[f32]) -> DVector<f32> {
        DVector::from_column_slice(xs)
    }

    #[test]
    fn orthogonal_vectors_score_zero_with_and_without_identity() {
        let q = v(&[1.0, 0.0]);
        let s = v(&[0.0, 1.0]);
        let p = ProjectionMatrix::identity(2);

        assert_eq!(similarity(&q, &s).unwrap(), 0.0);
        assert_eq!(similarity_with_projection(&q, &s, &p).unwrap(), 0.0);
    }

    #[test]
    fn identity_projection_matches_plain_similarity() {
        let mut rng = StdRng::seed_from_u64(7);
        let p = ProjectionMatrix::identity(16);

        for _ in 0..20 {
            let a = DVector::from_fn(16, |_, _| rng.gen_range(-1.0f32..1.0));
            let b = DVector::from_fn(16, |_, _| rng.gen_range(-1.0f32..1.0));
            let plain = similarity(&a, &b).unwrap();
            let projected = similarity_with_projection(&a, &b, &p).unwrap();
            assert!((plain - projected).abs() < 1e-5);
            assert!((plain - similarity(&b, &a).unwrap()).abs() < 1e-6);
        }
    }

    #[test]
    fn projection_is_asymmetric() {
        let p =
            ProjectionMatrix::from_matrix(DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]))
                .unwrap();
        let q = v(&[0.0, 1.0]);
        let s = v(&[1.0, 0.0]);

        assert_eq!(similarity_with_projection(&q, &s, &p).unwrap(), 1.0);
        assert_eq!(similarity_with_projection(&s, &q, &p).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = similarity(&v(&[1.0, 0.0]), &v(&[1.0, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, ProjectionError::DimensionMismatch { .. }));

        let p = ProjectionMatrix::identity(3);
        let err = similarity_with_projection(&v(&[1.0, 0.0]), &v(&[1.0, 0.0]), &p).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));

        assert!(ProjectionMatrix::from_matrix(DMatrix::zeros(2, 3)).is_err());
    }

    #[test]
    fn batch_matches_per_pair_scores() {
        let mut rng = StdRng::seed_from_u64(3);
        let p = ProjectionMatrix::random(8, &mut rng);
        let queries = DMatrix::from_fn(8, 5, |_, _| rng.gen_range(-1.0f32..1.0));
        let snippets = DMatrix::from_fn(8, 5, |_, _| rng.gen_range(-1.0f32..1.0));

        let plain = batch_similarity(&queries, &snippets).unwrap();
        let projected = batch_similarity_with_projection(&queries, &snippets, &p).unwrap();

        for i in 0..5 {
            let q = queries.column(i).into_owned();
            let s = snippets.column(i).into_owned();
            assert!((plain[i] - similarity(&q, &s).unwrap()).abs() < 1e-4);
            assert!((projected[i] - similarity_with_projection(&q, &s, &p).unwrap()).abs() < 1e-3);
        }
    }
}
