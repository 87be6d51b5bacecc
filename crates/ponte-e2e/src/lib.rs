//! End-to-end scenario tests for the ponte service bus live in `tests/`.
