/// A plain, synchronous value supplier.
///
/// This is the seam to the synchronous injection graph: anything that can hand
/// out a value on demand. Closures implement it directly.
pub trait Provider<T>: Send + Sync {
    fn get(&self) -> T;
}

impl<T, F> Provider<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn get(&self) -> T {
        self()
    }
}

/// A provider that always hands out a clone of the same value.
#[derive(Debug, Clone)]
pub struct Instance<T>(pub T);

impl<T> Provider<T> for Instance<T>
where
    T: Clone + Send + Sync,
{
    fn get(&self) -> T {
        self.0.clone()
    }
}
