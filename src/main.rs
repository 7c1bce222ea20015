#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use anyhow::Result;
use urlscan::run;

#[tokio::main]
async fn main() -> Result<()> {
  run().await
}
