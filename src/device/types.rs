//! AXAPI v3 request and response bodies

use serde::{Deserialize, Serialize};

/// Body of `POST /axapi/v3/auth`
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub credentials: Credentials<'a>,
}

#[derive(Debug, Serialize)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Response of `POST /axapi/v3/auth`
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(rename = "authresponse")]
    pub auth_response: AuthSignature,
}

#[derive(Debug, Deserialize)]
pub struct AuthSignature {
    pub signature: String,
}

/// A configured IPv4 BGP neighbor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Neighbor {
    #[serde(rename = "neighbor-ipv4")]
    pub neighbor_ipv4: String,
    #[serde(rename = "nbr-remote-as")]
    pub remote_as: u32,
}

/// Response of `GET .../neighbor/ipv4-neighbor`
#[derive(Debug, Default, Deserialize)]
pub struct Ipv4NeighborList {
    #[serde(rename = "ipv4-neighbor-list", default)]
    pub neighbors: Vec<Ipv4Neighbor>,
}

/// Body of `POST .../neighbor/ipv4-neighbor`
#[derive(Debug, Serialize)]
pub struct CreateNeighborRequest {
    #[serde(rename = "ipv4-neighbor")]
    pub neighbor: Ipv4Neighbor,
}
