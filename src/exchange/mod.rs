// =============================================================================
// Exchange adapter (C8 prerequisite)
// =============================================================================
//
// The teacher never abstracts over multiple exchanges — `binance/client.rs`
// is a concrete struct with inherent async methods, never a trait object —
// and SPEC_FULL.md only ever targets one exchange at a time, so this module
// keeps that shape rather than introducing an `ExchangeAdapter` trait. A
// trait with async methods would need the `async-trait` crate (absent from
// the teacher's dependency stack) for no real benefit: nothing in the engine
// needs to swap adapters at runtime, only the concrete `BinanceClient` is
// ever constructed. See DESIGN.md's dependency-changes section.

pub mod binance;

pub use binance::{BinanceClient, OpenOrder, OrderAck};
