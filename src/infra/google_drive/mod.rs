// =============================================================================
// GOOGLE DRIVE MODULE
// =============================================================================
//
// Implements the core ports against Google's APIs:
// - `ServiceAccountAuth` (AccessTokenProvider) - JWT bearer grant
// - `DriveFileStore` (FileStore) - Drive v3 metadata + media downloads
//
// Both share one reqwest `Client` so connections to googleapis.com are pooled.

pub mod drive_client;
pub mod service_account;

pub use drive_client::DriveFileStore;
pub use service_account::ServiceAccountAuth;

use reqwest::Client;
use std::time::Duration;

/// Builds the HTTP client shared by the token exchange and Drive calls.
pub fn build_http_client(connect_timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("drive-image-proxy/", env!("CARGO_PKG_VERSION")))
        .build()
}
