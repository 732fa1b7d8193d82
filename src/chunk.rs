use crate::error::{Result, ScanError};

/// Split `items` into `n` contiguous chunks whose lengths differ by at most one.
///
/// The first `len % n` chunks get the extra element, so concatenating the
/// output in order gives back the input.
pub fn split<T: Clone>(items: &[T], n: usize) -> Result<Vec<Vec<T>>> {
    if n == 0 {
        return Err(ScanError::InvalidArgument(
            "chunk count must be a positive integer".into(),
        ));
    }

    let base = items.len() / n;
    let remainder = items.len() % n;
    let mut chunks = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let end = start + base + usize::from(i < remainder);
        chunks.push(items[start..end].to_vec());
        start = end;
    }
    Ok(chunks)
}

/// Signed front door for callers holding a user-supplied count.
pub fn split_signed<T: Clone>(items: &[T], n: i64) -> Result<Vec<Vec<T>>> {
    let n = usize::try_from(n)
        .map_err(|_| ScanError::InvalidArgument(format!("chunk count {n} is negative")))?;
    split(items, n)
}
