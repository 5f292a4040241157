// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::lazy_static;
        pub(crate) use loom::sync;
        pub(crate) use loom::thread;
        pub(crate) use loom::thread_local;
        #[cfg(test)]
        pub(crate) use loom::model;
    } else {
        #[cfg(test)]
        pub(crate) use std::thread;
        pub(crate) use std::thread_local;

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<F>(f: F)
        where
            F: Fn() + Sync + Send + 'static,
        {
            f()
        }

        pub(crate) mod sync {
            pub(crate) use std::sync::*;
        }
    }
}

/// Wraps a `const fn` stripping the "constness" when compiled under loom.
///
/// `loom` tracks additional state alongside each atomic, which means the constructors of its
/// types cannot be `const`. Wrapping a constructor in this macro keeps it `const` for regular
/// builds so the primitives can still be placed in `static`s.
///
/// # Example
///
/// ```rust
/// # use rtlock_spin::loom_const_fn;
///
/// struct Something { str: &'static str }
///
/// impl Something {
///     loom_const_fn! {
///         pub const fn new() -> Self {
///             Self { str: "Hello World" }
///         }
///     }
/// }
/// ```
#[macro_export]
macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis const fn $name:ident($($arg:ident: $T:ty),*) -> $Ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($arg: $T),*) -> $Ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($arg: $T),*) -> $Ret $body
    };
}
