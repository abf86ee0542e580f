//! Internal testing utilities for the symshape crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe, catch_unwind};

/// Runs a table of test cases and reports every failing case at once.
///
/// Inference rules are usually tested against many operand shapes. Writing
/// one `Case` struct per test and a list of cases keeps each test short, and
/// a failure report lists every case that failed instead of stopping at the
/// first one.
///
/// ```
/// use symshape_testing::TestCases;
///
/// #[derive(Debug)]
/// struct Case {
///     lhs: i64,
///     rhs: i64,
///     expected: i64,
/// }
///
/// let cases = [
///     Case { lhs: 1, rhs: 5, expected: 5 },
///     Case { lhs: 3, rhs: 1, expected: 3 },
/// ];
///
/// cases.test_each(|case| {
///     assert_eq!(case.lhs.max(case.rhs), case.expected);
/// });
/// ```
///
/// Cases and the test closure must be unwind safe, since each case runs
/// under [`catch_unwind`]. Values with interior mutability should be created
/// inside the closure rather than captured by it.
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Call `test` with a reference to each case.
    ///
    /// Panics after all cases have run if any of them panicked, listing the
    /// failing cases.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Call `test` with each case by value.
    ///
    /// The debug representation of each case is captured before the case is
    /// moved into the test function, so it can still be reported on failure.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Debug representations of the cases that panicked.
#[derive(Default)]
struct Failures(Vec<String>);

impl Failures {
    fn record(&mut self, passed: bool, describe: impl FnOnce() -> String) {
        if !passed {
            self.0.push(describe());
        }
    }

    fn check(self) {
        assert!(
            self.0.is_empty(),
            "{} test cases failed: {:#?}",
            self.0.len(),
            self.0
        );
    }
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + RefUnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let passed = catch_unwind(|| test(&case)).is_ok();
            failures.record(passed, || format!("{:?}", case));
        }
        failures.check();
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + UnwindSafe,
    {
        let mut failures = Failures::default();
        for case in self {
            let desc = format!("{:?}", case);
            let test = &test;
            let passed = catch_unwind(move || test(case)).is_ok();
            failures.record(passed, || desc);
        }
        failures.check();
    }
}
