//! Embedded browser page.
//!
//! Served at `/` when the asset directory has no `index.html`. The page runs
//! the remote execution loop against the injected `window.ethereum` object:
//!
//! 1. No wallet injected → log and stop
//! 2. Request account access; no unlocked account → log and stop
//! 3. Open the WebSocket back to the relay
//! 4. Answer every `execute` envelope with an `executed` one
//!
//! Unloading the page only closes its socket, which frees the slot for the
//! reloaded page. Stopping the relay is left to [`RemoteHandle::disconnect`].
//!
//! [`RemoteHandle::disconnect`]: crate::RemoteHandle::disconnect

// ============================================================================
// Public Functions
// ============================================================================

/// Renders the page for a relay listening at `ws_url`.
///
/// # Arguments
///
/// * `ws_url` - WebSocket URL of the relay (e.g. "ws://127.0.0.1:3333")
#[must_use]
pub fn render_client_page(ws_url: &str) -> String {
    let ws_url_json = serde_json::to_string(ws_url).unwrap_or_else(|_| "\"\"".to_string());

    CLIENT_HTML_TEMPLATE
        .replace("$WS_URL_JSON", &ws_url_json)
        .replace("$WS_URL", &html_escape(ws_url))
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Escapes text for an HTML text node.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ============================================================================
// Constants
// ============================================================================

/// HTML template for the wallet page.
const CLIENT_HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Wallet Relay</title>
    <style>
        body {
            background: #1a1a2e;
            color: #ccc;
            font-family: monospace;
            padding: 40px;
            line-height: 1.6;
        }
        h1 { color: #e94560; margin-bottom: 20px; }
        .key { color: #4ade80; font-weight: bold; }
        .val { color: #fff; word-break: break-all; }
        hr { border: 0; border-top: 1px dashed #333; margin: 20px 0; }
        li { white-space: pre-wrap; margin-bottom: 8px; }
    </style>
</head>
<body>
    <h1>Wallet Relay</h1>
    <div><span class="key">WS_URL:</span> <span class="val">$WS_URL</span></div>
    <hr>
    <ul id="messages"></ul>
    <script>
    (async (w) => {
        const MAX_LOG_LINES = 200;
        const log = (msg) => {
            const list = document.querySelector('#messages');
            const entry = document.createElement('li');
            entry.innerText = `${new Date().toString()}\n${msg}`;
            list.appendChild(entry);
            while (list.children.length > MAX_LOG_LINES) list.removeChild(list.firstChild);
        };

        const wallet = w.ethereum;
        if (!wallet) return log('Wallet not found!');

        try {
            const accounts = await wallet.request({ method: 'eth_requestAccounts' });
            if (!accounts || !accounts[0]) throw new Error('No account');
        } catch (e) {
            return log('Please unlock your wallet first and then reload this page');
        }

        const socket = new WebSocket($WS_URL_JSON);
        const reply = (action, requestId, payload) =>
            socket.send(JSON.stringify({ action, requestId, payload }));

        const execute = async (requestId, { method, params }) => {
            log(`Request ID: ${requestId}\nCalling ${method}: ${JSON.stringify(params)}`);
            try {
                const result = await wallet.request({ method, params });
                reply('executed', requestId, result === undefined ? null : result);
            } catch (e) {
                reply('executed', requestId, { error: e.message || String(e) });
            }
        };

        socket.onopen = () => log('Connected to relay');
        socket.onclose = () => log('Relay connection closed');
        socket.onmessage = (msg) => {
            let message;
            try {
                message = JSON.parse(msg.data);
            } catch (e) {
                return log('Could not parse websocket message. Is it a proper JSON command?');
            }
            if (message.action === 'execute') execute(message.requestId, message.payload || {});
        };
        w.addEventListener('beforeunload', () => socket.close());
    })(window);
    </script>
</body>
</html>"##;

// ============================================================================
// Tests
// ============================================================================
