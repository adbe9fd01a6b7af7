pub fn build_main_ui_html() -> String {
    MAIN_UI_HTML.to_string()
}

const MAIN_UI_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Image Doctor</title>
  <style>
    :root {
      --bg: #1f2024;
      --panel: #1b1c20;
      --line: #3f4248;
      --input-bg: #272a2f;
      --input-line: #4a4e55;
      --text: #f3f5f7;
      --muted: #9ca2ad;
      --accent: #7c5cff;
      --danger: #ff6b6b;
      --btn-bg: #2a2d33;
      --btn-line: #5b616d;
      --font-sm: 12px;
    }
    * { box-sizing: border-box; }
    body {
      margin: 0;
      color: var(--text);
      background: var(--bg);
      font-family: "Segoe UI", "Helvetica Neue", sans-serif;
      font-size: 14px;
    }
    .wrap {
      max-width: 880px;
      margin: 0 auto;
      padding: 16px;
      display: flex;
      flex-direction: column;
      gap: 12px;
    }
    h1 {
      margin: 0;
      font-size: 22px;
    }
    .panel {
      border: 1px solid var(--line);
      background: var(--panel);
      padding: 10px;
    }
    form {
      display: flex;
      gap: 8px;
    }
    input[type="text"] {
      flex: 1 1 auto;
      height: 34px;
      padding: 0 8px;
      color: var(--text);
      background: var(--input-bg);
      border: 1px solid var(--input-line);
    }
    button, .button {
      height: 34px;
      padding: 0 14px;
      color: var(--text);
      background: var(--btn-bg);
      border: 1px solid var(--btn-line);
      cursor: pointer;
      text-decoration: none;
      display: inline-flex;
      align-items: center;
    }
    button.primary { background: var(--accent); border-color: var(--accent); }
    button:disabled { opacity: 0.5; cursor: default; }
    .result {
      min-height: 320px;
      display: flex;
      flex-direction: column;
      align-items: center;
      justify-content: center;
      gap: 10px;
      text-align: center;
    }
    .result img {
      max-width: 100%;
      max-height: 512px;
    }
    .spinner {
      width: 36px;
      height: 36px;
      border: 4px solid var(--line);
      border-top-color: var(--accent);
      border-radius: 50%;
      animation: spin 0.9s linear infinite;
    }
    @keyframes spin { to { transform: rotate(360deg); } }
    .error { color: var(--danger); }
    .muted { color: var(--muted); }
    .history-head {
      display: flex;
      justify-content: space-between;
      align-items: center;
    }
    .history-list {
      list-style: none;
      margin: 6px 0 0;
      padding: 0;
    }
    .history-list li {
      padding: 5px 4px;
      border-bottom: 1px solid #2f3137;
      cursor: pointer;
      display: flex;
      justify-content: space-between;
      gap: 8px;
    }
    .history-list li:hover { background: var(--input-bg); }
    .history-list .ts { color: var(--muted); font-size: var(--font-sm); white-space: nowrap; }
    .status { min-height: 18px; font-size: var(--font-sm); color: var(--muted); }
    [hidden] { display: none !important; }
  </style>
</head>
<body>
  <main class="wrap">
    <h1>Image Doctor</h1>

    <section class="panel">
      <form id="promptForm">
        <input id="prompt" type="text" autocomplete="off"
               placeholder="e.g. A futuristic city skyline at sunset, with flying cars" />
        <button id="submit" class="primary" type="submit">Generate Image</button>
        <button id="clear" type="button">Clear</button>
      </form>
    </section>

    <section class="panel result" id="result">
      <div id="spinner" class="spinner" hidden></div>
      <img id="image" alt="Generated image" hidden />
      <div id="error" class="error" hidden></div>
      <div id="message" class="muted"></div>
      <a id="download" class="button" hidden>Download</a>
    </section>

    <section class="panel" id="historyPanel" hidden>
      <div class="history-head">
        <strong>Recent prompts</strong>
        <button id="clearHistory" type="button">Clear all</button>
      </div>
      <ul id="history" class="history-list"></ul>
    </section>

    <div id="status" class="status"></div>
  </main>

  <script>
    const state = {
      sessionId: "",
      view: null,
      pending: false,
    };

    function setStatus(message) {
      document.getElementById("status").textContent = message || "";
    }

    async function apiGet(path) {
      const res = await fetch(path, { method: "GET" });
      const data = await res.json();
      if (!res.ok || !data.ok) {
        throw new Error(data.error || "request failed");
      }
      return data;
    }

    async function apiPost(path, body) {
      const res = await fetch(path, {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify(body || {}),
      });
      const data = await res.json();
      if (!res.ok || !data.ok) {
        throw new Error(data.error || "request failed");
      }
      return data;
    }

    function applyView(view) {
      state.view = view;
      render();
    }

    function render() {
      const view = state.view;
      if (!view) {
        return;
      }
      const loading = view.is_loading || state.pending;

      const input = document.getElementById("prompt");
      if (document.activeElement !== input || loading) {
        input.value = view.prompt;
      }
      input.disabled = loading;

      const submit = document.getElementById("submit");
      submit.textContent = loading ? "Generating..." : view.submit_label;
      submit.disabled = loading;

      document.getElementById("spinner").hidden = !loading;

      const image = document.getElementById("image");
      if (!loading && view.image_data_uri) {
        image.src = view.image_data_uri;
        image.hidden = false;
      } else {
        image.removeAttribute("src");
        image.hidden = true;
      }

      const error = document.getElementById("error");
      error.textContent = loading ? "" : view.error || "";
      error.hidden = loading || !view.error;

      document.getElementById("message").textContent = loading
        ? "Conjuring your image... please wait."
        : view.status_message;

      const download = document.getElementById("download");
      if (!loading && view.can_download) {
        download.href = `/app/download?session_id=${encodeURIComponent(state.sessionId)}`;
        download.download = view.download_file_name;
        download.hidden = false;
      } else {
        download.removeAttribute("href");
        download.hidden = true;
      }

      const panel = document.getElementById("historyPanel");
      const list = document.getElementById("history");
      list.innerHTML = "";
      panel.hidden = view.history.length === 0;
      view.history.forEach((entry, index) => {
        const item = document.createElement("li");
        item.title = "Use this prompt";

        const text = document.createElement("span");
        text.textContent = entry.prompt;
        const ts = document.createElement("span");
        ts.className = "ts";
        ts.textContent = entry.ts;

        item.appendChild(text);
        item.appendChild(ts);
        item.addEventListener("click", async () => {
          if (loading) {
            return;
          }
          try {
            const data = await apiPost("/app/history/select", {
              session_id: state.sessionId,
              index,
            });
            applyView(data.view);
            setStatus("");
          } catch (err) {
            setStatus(`History error: ${err.message}`);
          }
        });
        list.appendChild(item);
      });
    }

    async function init() {
      try {
        const data = await apiPost("/app/session", {});
        state.sessionId = data.session_id;
        applyView(data.view);
      } catch (err) {
        setStatus(`Startup error: ${err.message}`);
      }
    }

    document.getElementById("promptForm").addEventListener("submit", async (event) => {
      event.preventDefault();
      if (state.pending || !state.sessionId) {
        return;
      }
      const prompt = document.getElementById("prompt").value;
      state.pending = true;
      render();
      try {
        const data = await apiPost("/app/generate", {
          session_id: state.sessionId,
          prompt,
        });
        state.pending = false;
        applyView(data.view);
        setStatus("");
      } catch (err) {
        state.pending = false;
        render();
        setStatus(`Request error: ${err.message}`);
      }
    });

    document.getElementById("clear").addEventListener("click", async () => {
      try {
        const data = await apiPost("/app/clear", { session_id: state.sessionId });
        state.pending = false;
        applyView(data.view);
        setStatus("");
      } catch (err) {
        setStatus(`Clear failed: ${err.message}`);
      }
    });

    document.getElementById("clearHistory").addEventListener("click", async () => {
      try {
        const data = await apiPost("/app/history/clear", { session_id: state.sessionId });
        applyView(data.view);
        setStatus("");
      } catch (err) {
        setStatus(`History error: ${err.message}`);
      }
    });

    window.addEventListener("pagehide", () => {
      if (!state.sessionId) {
        return;
      }
      const body = new Blob([JSON.stringify({ session_id: state.sessionId })], {
        type: "application/json",
      });
      navigator.sendBeacon("/app/session/close", body);
    });

    init();
  </script>
</body>
</html>
"#;
