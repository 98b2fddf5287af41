//! Publisher side of an OPC UA PubSub (UADP) endpoint with a frozen,
//! fixed-size real-time message layout.

pub mod network;
pub mod os;
pub mod pubsub;
pub mod threads;
pub mod uadp;
