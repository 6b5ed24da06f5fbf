// Unit tests for resilient-client
//
// Each source module has a corresponding test file that focuses on
// behavior: classification rules, retry budgets, breaker transitions.
// HTTP behavior is covered by the wiremock suites under tests/.

pub mod error;
