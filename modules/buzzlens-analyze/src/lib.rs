pub mod aggregate;
pub mod corpus;
pub mod dispatch;
pub mod distribute;
pub mod infer;
pub mod merge;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod themes;
