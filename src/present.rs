//! Presenting a surface for the lifetime of a future.
//!
//! The host platform supplies the actual surfaces (view controllers, alert
//! views, pickers). This module only pins down the ordering rules: a surface
//! is presented while its future is pending and dismissed exactly once when
//! the future settles.
use std::fmt::Debug;

use crate::bridge::Promisable;
use crate::{pending, Error, Future, Resolver};

/// Something the host can put on screen and take down again.
pub trait Surface: Send + Sync + 'static {
    fn present(&self);

    fn dismiss(&self);
}

/// Presents `surface` and dismisses it once `future` settles, whatever the
/// outcome. The returned future carries `future`'s outcome.
///
/// A future that has already settled is returned as is: the surface is
/// neither presented nor dismissed.
///
/// # Examples
///
/// ```
/// use pledge::present::{present, Surface};
/// use pledge::{pending, Error};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// struct Sheet(Arc<AtomicBool>);
///
/// impl Surface for Sheet {
///     fn present(&self) {
///         self.0.store(true, Ordering::SeqCst);
///     }
///     fn dismiss(&self) {
///         self.0.store(false, Ordering::SeqCst);
///     }
/// }
///
/// let on_screen = Arc::new(AtomicBool::new(false));
/// let (choice, resolver) = pending::<usize>();
/// let choice = present(Sheet(on_screen.clone()), choice);
/// assert!(on_screen.load(Ordering::SeqCst));
///
/// resolver.reject(Error::Cancelled);
/// assert!(!on_screen.load(Ordering::SeqCst));
/// assert_eq!(choice.error(), Some(Error::Cancelled));
/// ```
pub fn present<S, T>(surface: S, future: Future<T>) -> Future<T>
where
    S: Surface,
    T: Clone + Send + 'static,
{
    if !future.is_pending() {
        tracing::debug!(state = ?future.state(), "future already settled; not presenting");
        return future;
    }
    surface.present();
    future.always(move || surface.dismiss())
}

/// Presents a surface that produces its own future.
pub fn present_promisable<S>(surface: S) -> Future<S::Output>
where
    S: Surface + Promisable,
{
    let future = surface.produces_future();
    present(surface, future)
}

/// Classifies how a dialog was dismissed.
///
/// Pressing the cancel button rejects with [`Error::Cancelled`]; any other
/// button fulfils with its index.
pub struct Dialog {
    resolver: Resolver<usize>,
    button_count: usize,
    cancel_index: Option<usize>,
}

impl Dialog {
    pub fn new(button_count: usize, cancel_index: Option<usize>) -> (Self, Future<usize>) {
        if button_count == 1 && cancel_index == Some(0) {
            tracing::warn!(
                "dialog's only button is its cancel button; its future will always be cancelled"
            );
        }
        let (future, resolver) = pending();
        let dialog = Self {
            resolver,
            button_count,
            cancel_index,
        };
        (dialog, future)
    }

    /// Reports the button the dialog was dismissed with.
    pub fn dismissed_with(&self, index: usize) {
        if self.cancel_index == Some(index) {
            self.resolver.reject(Error::Cancelled);
        } else if index >= self.button_count {
            self.resolver.reject(Error::msg(format!(
                "button index {index} out of range for {} buttons",
                self.button_count
            )));
        } else {
            self.resolver.fulfill(index);
        }
    }
}

impl Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("button_count", &self.button_count)
            .field("cancel_index", &self.cancel_index)
            .field("pending", &self.resolver.is_pending())
            .finish()
    }
}
