/// Whether a peer connection was established by us or accepted from them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Link {
    /// We initiated the connection.
    Outbound,
    /// The peer connected to us.
    Inbound,
}

impl Link {
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Outbound)
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Inbound)
    }
}
