//! Bulk byte-addressable buffers (§10.3): the typed stand-in for
//! "recognizing a big contiguous array" at compile time rather than by
//! runtime introspection.

/// A value that can be viewed as (and rebuilt from) a flat byte buffer.
/// The chunked tree-reduce path (§4.E) uses this to move accumulators
/// too large for a single typed message.
pub trait BulkBuffer: Sized {
    fn nbytes(&self) -> usize;
    fn as_bytes(&self) -> &[u8];
    fn from_bytes(bytes: Vec<u8>) -> Self;
}

impl<T: bytemuck::Pod> BulkBuffer for ndarray::Array1<T> {
    fn nbytes(&self) -> usize {
        self.len() * std::mem::size_of::<T>()
    }

    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(
            self.as_slice()
                .expect("BulkBuffer: accumulator array must be contiguous"),
        )
    }

    fn from_bytes(bytes: Vec<u8>) -> Self {
        let items: &[T] = bytemuck::cast_slice(&bytes);
        ndarray::Array1::from(items.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn roundtrips_through_bytes() {
        let a = array![1i32, 2, 3, 4];
        let bytes = a.as_bytes().to_vec();
        assert_eq!(bytes.len(), a.nbytes());
        let b: ndarray::Array1<i32> = BulkBuffer::from_bytes(bytes);
        assert_eq!(a, b);
    }
}
