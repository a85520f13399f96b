/// Scenario suites for the forecasting pipeline
///
/// Unit tests live next to the code they exercise; these modules cover
/// behaviour that spans several stages:
///
/// * `pipeline_tests` - CSV to metrics through a session, end to end
/// * `session_tests` - Immutable session semantics and the shared store
/// * `property_tests` - Split, rolling window, order search and metrics properties
pub mod pipeline_tests;
pub mod property_tests;
