//! Assembly of the seven layers into one stack.

use crate::layers::{
    ApplicationLayer, DataLinkLayer, NetworkLayer, PhysicalLayer, PresentationLayer, SessionLayer,
    TransportLayer,
};
use std::sync::Arc;

/// Which side of the conversation a stack plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

/// One complete protocol stack for a single process role.
///
/// Construction wires every layer to its upper and lower neighbor, bottom to
/// top. The handles exposed here are the points a program drives: the
/// physical layer for the medium, the application layer for requests and
/// routes, and the session layer for direct session management.
///
/// A stack assumes one logical thread of control; pumping
/// [`PhysicalLayer::receive`] from several threads at once requires external
/// synchronization.
pub struct Stack {
    physical: Arc<PhysicalLayer>,
    datalink: Arc<DataLinkLayer>,
    network: Arc<NetworkLayer>,
    transport: Arc<TransportLayer>,
    session: Arc<SessionLayer>,
    presentation: Arc<PresentationLayer>,
    application: Arc<ApplicationLayer>,
}

impl Stack {
    /// Builds a stack for the given role, with the physical layer addressed
    /// at `host:port`.
    pub fn build(role: Role, host: impl Into<String>, port: u16) -> Self {
        let physical = Arc::new(PhysicalLayer::new(role, host, port));
        let datalink = Arc::new(DataLinkLayer::new());
        let network = Arc::new(NetworkLayer::new());
        let transport = Arc::new(TransportLayer::new());
        let session = Arc::new(SessionLayer::new());
        let presentation = Arc::new(PresentationLayer::new());
        let application = Arc::new(ApplicationLayer::new(role));

        physical.set_upper(datalink.clone());
        datalink.set_lower(physical.clone());
        datalink.set_upper(network.clone());
        network.set_lower(datalink.clone());
        network.set_upper(transport.clone());
        transport.set_lower(network.clone());
        transport.set_upper(session.clone());
        session.set_lower(transport.clone());
        session.set_upper(presentation.clone());
        presentation.set_lower(session.clone());
        presentation.set_upper(application.clone());
        application.set_lower(presentation.clone());

        Self {
            physical,
            datalink,
            network,
            transport,
            session,
            presentation,
            application,
        }
    }

    pub fn physical(&self) -> &Arc<PhysicalLayer> {
        &self.physical
    }

    pub fn datalink(&self) -> &Arc<DataLinkLayer> {
        &self.datalink
    }

    pub fn network(&self) -> &Arc<NetworkLayer> {
        &self.network
    }

    pub fn transport(&self) -> &Arc<TransportLayer> {
        &self.transport
    }

    pub fn session(&self) -> &Arc<SessionLayer> {
        &self.session
    }

    pub fn presentation(&self) -> &Arc<PresentationLayer> {
        &self.presentation
    }

    pub fn application(&self) -> &Arc<ApplicationLayer> {
        &self.application
    }
}
