use ndarray::{Array2, ArrayView2};

/// Overlapping windows of `steps` consecutive rows, one flattened window per
/// output row (`(rows - steps + 1) × (steps · features)`).
///
/// Window `i` covers rows `i..i + steps` and ends at row `i + steps - 1`.
/// Fewer rows than `steps` (or `steps == 0`) yields no windows.
pub fn sliding_windows(data: ArrayView2<'_, f64>, steps: usize) -> Array2<f64> {
    let (rows, features) = data.dim();
    if steps == 0 || rows < steps {
        return Array2::zeros((0, steps * features));
    }

    let count = rows - steps + 1;
    Array2::from_shape_fn((count, steps * features), |(w, j)| {
        data[[w + j / features, j % features]]
    })
}
