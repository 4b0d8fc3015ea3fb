/// ragged 2-D matrix of scalars. rows grow independently, so each
/// variable can carry a different number of term cells.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Matrix<T> {
    rows: Vec<Vec<T>>,
}

impl<T> Matrix<T>
where
    T: Default + Clone,
{
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// fetch the cell, growing both dimensions with zeroed cells on demand
    pub fn insert(&mut self, i: usize, j: usize) -> &mut T {
        if self.rows.len() <= i {
            self.rows.resize_with(i + 1, Vec::new);
        }
        let row = &mut self.rows[i];
        if row.len() <= j {
            row.resize_with(j + 1, T::default);
        }
        &mut row[j]
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&T> {
        self.rows.get(i).and_then(|row| row.get(j))
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn cols(&self, i: usize) -> usize {
        self.rows.get(i).map(Vec::len).unwrap_or(0)
    }

    pub fn row(&self, i: usize) -> Option<&[T]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn remove_row(&mut self, i: usize) {
        if i < self.rows.len() {
            self.rows.remove(i);
        }
    }

    pub fn remove_col(&mut self, i: usize, j: usize) {
        if let Some(row) = self.rows.get_mut(i) {
            if j < row.len() {
                row.remove(j);
            }
        }
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// walk the union of both index spaces, comparing cells through eq
    /// (missing cells compare as absent). returns true when any cell
    /// differs and collects the differing row indices if asked.
    pub fn differs<F>(&self, other: &Self, eq: F, mut changed: Option<&mut Vec<usize>>) -> bool
    where
        F: Fn(Option<&T>, Option<&T>) -> bool,
    {
        let mut any = false;
        let rows = self.rows().max(other.rows());
        for i in 0..rows {
            let cols = self.cols(i).max(other.cols(i));
            for j in 0..cols {
                if !eq(self.get(i, j), other.get(i, j)) {
                    if let Some(changed) = changed.as_mut() {
                        changed.push(i);
                    }
                    any = true;
                    break;
                }
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(a: Option<&f32>, b: Option<&f32>) -> bool {
        let a = a.copied().unwrap_or(0.0);
        let b = b.copied().unwrap_or(0.0);
        (a - b).abs() <= 0.05
    }

    #[test]
    fn insert_grows_both_dimensions() {
        let mut m = Matrix::<f32>::new();
        *m.insert(2, 3) = 1.0;
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(2), 4);
        assert_eq!(m.get(2, 3), Some(&1.0));
        assert_eq!(m.get(2, 2), Some(&0.0));
        assert_eq!(m.get(0, 0), None);
    }

    #[test]
    fn differs_collects_changed_rows() {
        let mut a = Matrix::<f32>::new();
        let mut b = Matrix::<f32>::new();
        *a.insert(0, 0) = 1.0;
        *a.insert(1, 1) = 0.5;
        *b.insert(0, 0) = 1.0;
        *b.insert(1, 1) = 0.9;
        let mut changed = Vec::new();
        assert!(a.differs(&b, eq, Some(&mut changed)));
        assert_eq!(changed, vec![1]);
    }

    #[test]
    fn differs_treats_missing_as_zero() {
        let mut a = Matrix::<f32>::new();
        let b = Matrix::<f32>::new();
        *a.insert(0, 0) = 0.01;
        assert!(!a.differs(&b, eq, None));
        *a.insert(0, 1) = 0.9;
        assert!(a.differs(&b, eq, None));
    }

    #[test]
    fn remove_shrinks_exactly_one_axis() {
        let mut m = Matrix::<f32>::new();
        *m.insert(0, 1) = 1.0;
        *m.insert(1, 2) = 2.0;
        m.remove_col(1, 0);
        assert_eq!(m.cols(1), 2);
        assert_eq!(m.cols(0), 2);
        m.remove_row(0);
        assert_eq!(m.rows(), 1);
        assert_eq!(m.get(0, 1), Some(&2.0));
    }
}
