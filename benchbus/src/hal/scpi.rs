use crate::hal::equipment::HalError;
use crate::hal::measurement::TestMeasurement;
use crate::hal::transport::Transport;

/// Named transport speaking the IEEE 488.2 common commands
///
/// Every call checks the connection first so that a driver used while
/// disconnected fails with [`HalError::NotConnected`] instead of a transport error.
#[derive(Debug)]
pub(crate) struct ScpiSession {
    name: String,
    transport: Transport,
    identity: Option<String>,
}

impl ScpiSession {
    pub(crate) fn new(name: &str, transport: Transport) -> Self {
        Self {
            name: name.to_string(),
            transport,
            identity: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn transport(&self) -> &Transport {
        &self.transport
    }

    pub(crate) fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub(crate) async fn connect(&mut self) -> Result<(), HalError> {
        self.transport
            .connect()
            .await
            .map_err(|source| HalError::Connection {
                name: self.name.clone(),
                source,
            })
    }

    pub(crate) async fn disconnect(&mut self) {
        self.transport.disconnect().await;
    }

    /// send a command that has no reply
    pub(crate) async fn command(&mut self, command: &str) -> Result<(), HalError> {
        self.send(command).await.map(|_| ())
    }

    /// send a query and return its reply line
    pub(crate) async fn query(&mut self, query: &str) -> Result<String, HalError> {
        self.send(query).await
    }

    pub(crate) async fn query_f64(&mut self, query: &str) -> Result<f64, HalError> {
        let reply = self.query(query).await?;
        reply
            .trim()
            .parse::<f64>()
            .map_err(|_| HalError::InvalidReply {
                command: query.to_string(),
                reply,
            })
    }

    /// query a numeric reading and wrap it as a measurement
    pub(crate) async fn measure(
        &mut self,
        query: &str,
        parameter: &str,
        unit: &str,
    ) -> Result<TestMeasurement, HalError> {
        let value = self.query_f64(query).await?;
        Ok(TestMeasurement::new(parameter, value, unit))
    }

    pub(crate) async fn identify(&mut self) -> Result<String, HalError> {
        let identity = self.query("*IDN?").await?;
        tracing::info!("{} identified as: {}", self.name, identity);
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    pub(crate) async fn reset(&mut self) -> Result<(), HalError> {
        self.command("*RST").await
    }

    /// `*OPC?` returns once every earlier command has been executed
    pub(crate) async fn wait_complete(&mut self) -> Result<(), HalError> {
        let reply = self.query("*OPC?").await?;
        if reply.trim() != "1" {
            return Err(HalError::InvalidReply {
                command: "*OPC?".to_string(),
                reply,
            });
        }
        Ok(())
    }

    /// `*TST?` passes only on a literal `0`
    pub(crate) async fn self_test(&mut self) -> Result<bool, HalError> {
        let reply = self.query("*TST?").await?;
        let passed = reply == "0";
        if !passed {
            tracing::warn!("{} self test reported: {}", self.name, reply);
        }
        Ok(passed)
    }

    async fn send(&mut self, command: &str) -> Result<String, HalError> {
        if !self.transport.is_connected() {
            return Err(HalError::NotConnected(self.name.clone()));
        }
        self.transport
            .send_command(command)
            .await
            .map_err(|source| HalError::Connection {
                name: self.name.clone(),
                source,
            })
    }
}
