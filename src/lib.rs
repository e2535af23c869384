/*! Stampede is a scripted HTTP load generator.

Each *user* plays a plain-text script, an ordered list of request blocks
and pauses, from top to bottom. Many users run concurrently; every
finished request becomes one [`Sample`](sample::Sample) on a shared
channel, and the fleet runner encodes the stream into a single append-only
binary log. Reporting is a separate pass over that log.

# Scripts

Scripts are line oriented. A line starting with an HTTP method opens a
request block; `Name:Value` lines add headers; `@path` loads the body from
a file; `=> PAUSE <millis>` sleeps between requests; `//` lines are
comments:

```text
GET http://localhost:8080/api/things
Accept:application/json

=> PAUSE 500

POST http://localhost:8080/api/things
Content-Type:application/json
@payload.json
```

# Architecture

```text
 scripts (*.txt)                                 result log
┌──────────────┐   chunks   ┌────────────┐        ┌─────────┐
│ script::scan ├───────────►│ user::User │ ...    │  codec  │
└──────────────┘            └─────┬──────┘        └────▲────┘
                                  │ Sample                │
                                  ▼                       │
                            ┌──────────────────────────┐  │
                            │ runner::Runner (fan-in,  ├──┘
                            │ stop broadcast, drain)   │
                            └──────────────────────────┘

 later:  result log ──► metrics::Builder ──► report::{text,json,plot,…}
```

Execution within a user is strictly sequential; ordering across users is
completion order. Stop is a broadcast: pauses and channel sends cancel
promptly, an in-flight request is bounded by the attacker timeout, and the
runner drains already-produced samples for a bounded grace period.
*/

pub mod client;
pub mod codec;
pub mod error;
pub mod metrics;
pub mod quantile;
pub mod report;
pub mod runner;
pub mod sample;
pub mod script;
pub mod target;
pub mod user;

#[cfg(test)]
pub(crate) mod testutil;

pub mod prelude {
    pub use crate::client::{Attacker, AttackerConfig};
    pub use crate::error::Error;
    pub use crate::metrics::{metrics, Metrics};
    pub use crate::report::Reporter;
    pub use crate::runner::{Runner, RunnerConfig};
    pub use crate::sample::Sample;
    pub use crate::target::{Method, Target};
}
