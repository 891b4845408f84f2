//! Generated wire types for the `psdb.v1alpha1` gateway protocol and the
//! Vitess messages it embeds.
//!
//! Package modules mirror the protobuf package tree so the cross-package
//! references emitted by prost (`super::super::query::...`) resolve.

#![allow(clippy::all)]

pub mod vtrpc {
    tonic::include_proto!("vtrpc");
}

pub mod query {
    tonic::include_proto!("query");
}

pub mod vtgate {
    tonic::include_proto!("vtgate");
}

pub mod psdb {
    pub mod v1alpha1 {
        tonic::include_proto!("psdb.v1alpha1");
    }
}
