//! # saproxy-reactor: default `Reactor` implementation
//!
//! | Platform | Backend        | Notes                                   |
//! |----------|----------------|-----------------------------------------|
//! | Linux    | `EpollReactor` | level-triggered, one epoll fd per loop  |
//!
//! The relay engine only sees the `saproxy_core::Reactor` trait; swapping
//! backends is a change to the `PlatformReactor` alias.

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod epoll;
        pub use epoll::EpollReactor;
        pub use epoll::EpollReactor as PlatformReactor;
    } else {
        compile_error!("saproxy-reactor: no reactor backend for this platform (epoll required)");
    }
}
