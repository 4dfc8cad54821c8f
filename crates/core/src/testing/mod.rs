//! Testing utilities and mock implementations.
//!
//! This module provides an in-memory work queue and entity fixtures,
//! allowing end-to-end orchestration tests without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use conveyor_core::testing::{fixtures, MockWorkQueue};
//!
//! let queue = MockWorkQueue::new("upload");
//! let request = fixtures::video_request("Some Title");
//! ```

mod mock_queue;

pub use mock_queue::MockWorkQueue;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::account::{CreateAccountRequest, CreateStorageInstanceRequest};
    use crate::task::CreateTaskRequest;
    use crate::video::CreateVideoRequest;

    /// One GiB, for readable quota arithmetic.
    pub const GIB: i64 = 1024 * 1024 * 1024;

    /// Create a video registration request with reasonable defaults.
    pub fn video_request(title: &str) -> CreateVideoRequest {
        CreateVideoRequest {
            title: title.to_string(),
            source_url: Some(format!(
                "magnet:?xt=urn:btih:{}",
                title.to_lowercase().replace(' ', "")
            )),
            metadata_json: None,
        }
    }

    /// Create a task request for a video, destined for the download queue.
    pub fn task_request(video_id: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            video_id: video_id.to_string(),
            queue_name: "download".to_string(),
            max_retries: 3,
        }
    }

    /// Create an account provisioning request with a 20 GiB daily quota.
    pub fn account_request(email: &str, storage_instance_id: &str) -> CreateAccountRequest {
        CreateAccountRequest {
            email: email.to_string(),
            storage_instance_id: Some(storage_instance_id.to_string()),
            daily_quota_bytes: 20 * GIB,
        }
    }

    /// Create a storage instance request with 100 GiB capacity.
    pub fn storage_request() -> CreateStorageInstanceRequest {
        CreateStorageInstanceRequest {
            capacity_bytes: 100 * GIB,
        }
    }
}
