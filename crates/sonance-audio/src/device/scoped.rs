//! Scoped line acquisition: whatever happens inside, the line ends closed.

use std::ops::{Deref, DerefMut};

use sonance_core::{FormatDescriptor, Result};
use tracing::debug;

use super::Line;

/// An open line that is closed when the guard drops.
pub struct LineGuard<'a, L: Line + ?Sized> {
    line: &'a mut L,
}

impl<'a, L: Line + ?Sized> LineGuard<'a, L> {
    /// Open `line`, binding `format` when the line accepts one at open time.
    ///
    /// If opening fails the line is closed before the error is returned.
    pub fn open(line: &'a mut L, format: Option<&FormatDescriptor>) -> Result<Self> {
        let format = format.filter(|_| line.supports_deferred_format());
        // Constructed first so a failed open still runs close.
        let mut guard = Self { line };
        guard.line.open(format)?;
        Ok(guard)
    }
}

impl<L: Line + ?Sized> Deref for LineGuard<'_, L> {
    type Target = L;

    fn deref(&self) -> &L {
        self.line
    }
}

impl<L: Line + ?Sized> DerefMut for LineGuard<'_, L> {
    fn deref_mut(&mut self) -> &mut L {
        self.line
    }
}

impl<L: Line + ?Sized> Drop for LineGuard<'_, L> {
    fn drop(&mut self) {
        debug!("Releasing line {}", self.line.info().id);
        self.line.close();
    }
}

/// Open, start, and run `body` against `line`, then release it.
///
/// On success the line is drained before it is closed. The line is closed exactly
/// once on every exit path, including errors and panics raised by `body`.
pub fn scoped_open<L, T, F>(line: &mut L, format: Option<&FormatDescriptor>, body: F) -> Result<T>
where
    L: Line + ?Sized,
    F: FnOnce(&mut L) -> Result<T>,
{
    let mut guard = LineGuard::open(line, format)?;
    guard.start()?;
    let value = body(&mut *guard)?;
    guard.drain()?;
    Ok(value)
}
