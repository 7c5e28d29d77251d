/*!
 # Light requests

 Hosts usually express "turn on" as a bag of optional attributes. This module
 turns such a request into the session calls that realise it.
*/

use tracing::{debug, instrument};

use crate::device::{DeviceSession, LightState};
use crate::Result;

/// Attributes that may accompany a turn-on request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOnRequest {
    /// Brightness (0-255)
    pub brightness: Option<u8>,
    /// Color to show
    pub rgb: Option<(u8, u8, u8)>,
    /// Effect name, see [`crate::effects`]
    pub effect: Option<String>,
}

impl TurnOnRequest {
    /// Requests a brightness (0-255)
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = Some(brightness);
        self
    }

    /// Requests a color
    pub fn with_rgb(mut self, rgb: (u8, u8, u8)) -> Self {
        self.rgb = Some(rgb);
        self
    }

    /// Requests an effect by name
    pub fn with_effect(mut self, effect: impl Into<String>) -> Self {
        self.effect = Some(effect.into());
        self
    }
}

impl DeviceSession {
    /// Applies a turn-on request and returns the resulting state
    ///
    /// The strip is powered on first unless it is already known to be on.
    /// A color in the same request as a brightness is sent once, scaled by the
    /// new brightness.
    #[instrument(skip(self))]
    pub async fn apply(&self, request: &TurnOnRequest) -> Result<LightState> {
        if self.state().is_on != Some(true) {
            self.turn_on().await?;
        }

        match (request.brightness, request.rgb) {
            (Some(brightness), Some(rgb)) => {
                self.store_brightness(brightness);
                self.set_color(rgb, Some(brightness)).await?;
            }
            (Some(brightness), None) => self.set_brightness_local(brightness).await?,
            (None, Some(rgb)) => self.set_color(rgb, None).await?,
            (None, None) => {}
        }

        if let Some(effect) = &request.effect {
            self.set_effect(effect).await?;
        }

        let state = self.state();
        debug!("State after request: {:?}", state);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TURN_ON_CMD;
    use crate::device::SessionConfig;
    use crate::transport::mock::{MockTransport, ADDRESS};
    use crate::transport::Transport;
    use std::sync::Arc;

    async fn session() -> (Arc<MockTransport>, DeviceSession) {
        let transport = Arc::new(MockTransport::new());
        let device = DeviceSession::new(
            SessionConfig::new(ADDRESS),
            transport.clone() as Arc<dyn Transport>,
        )
        .await
        .unwrap();
        (transport, device)
    }

    #[tokio::test]
    async fn empty_request_powers_on() {
        let (transport, device) = session().await;

        let state = device.apply(&TurnOnRequest::default()).await.unwrap();

        assert_eq!(state.is_on, Some(true));
        assert_eq!(transport.written(), vec![TURN_ON_CMD.to_vec()]);
    }

    #[tokio::test]
    async fn already_on_skips_power_command() {
        let (transport, device) = session().await;
        device.turn_on().await.unwrap();

        device.apply(&TurnOnRequest::default()).await.unwrap();

        assert_eq!(transport.written().len(), 1);
    }

    #[tokio::test]
    async fn brightness_request_stores_brightness() {
        let (_, device) = session().await;

        let state = device
            .apply(&TurnOnRequest::default().with_brightness(128))
            .await
            .unwrap();

        assert_eq!(state.brightness, 128);
    }

    #[tokio::test]
    async fn color_request_uses_new_brightness() {
        let (transport, device) = session().await;

        device
            .apply(
                &TurnOnRequest::default()
                    .with_brightness(128)
                    .with_rgb((0, 255, 0)),
            )
            .await
            .unwrap();

        assert_eq!(
            transport.written(),
            vec![
                TURN_ON_CMD.to_vec(),
                vec![0x7b, 0xff, 0x07, 0, 127, 0, 0x00, 0xff, 0xbf],
            ]
        );
        let state = device.state();
        assert_eq!(state.rgb, Some((0, 255, 0)));
        assert_eq!(state.brightness, 128);
    }

    #[tokio::test]
    async fn brightness_only_request_resends_stored_color() {
        let (transport, device) = session().await;
        device.set_color((255, 0, 0), None).await.unwrap();

        device
            .apply(&TurnOnRequest::default().with_brightness(128))
            .await
            .unwrap();

        assert_eq!(
            transport.written(),
            vec![
                vec![0x7b, 0xff, 0x07, 0xff, 0, 0, 0x00, 0xff, 0xbf],
                TURN_ON_CMD.to_vec(),
                vec![0x7b, 0xff, 0x07, 127, 0, 0, 0x00, 0xff, 0xbf],
            ]
        );
    }

    #[tokio::test]
    async fn effect_request_selects_effect() {
        let (_, device) = session().await;

        let state = device
            .apply(&TurnOnRequest::default().with_effect("AUTO"))
            .await
            .unwrap();

        assert_eq!(state.effect.as_deref(), Some("AUTO"));
    }
}
