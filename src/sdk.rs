/// Browser loader mirroring [`crate::bootstrap`]: it reads `/_editor/config`
/// and drives the same retry policy against the proxied SDK.
pub fn bootstrap_script() -> String {
    r#"// TK Designer editor bootstrap
(function(global) {
  const CONFIG_URL = "/_editor/config";

  function delayFor(retry, attempt) {
    return retry.backoff === "exponential"
      ? retry.baseDelay * Math.pow(2, attempt)
      : retry.baseDelay * attempt;
  }

  function injectScript(src, timeoutMs) {
    return new Promise((resolve, reject) => {
      const existing = document.querySelector(`script[src="${src}"]`);
      if (existing) existing.remove();
      const script = document.createElement("script");
      script.src = src;
      script.async = true;
      script.crossOrigin = "anonymous";
      const timer = setTimeout(() => reject(new Error(`SDK loading timeout after ${timeoutMs}ms`)), timeoutMs);
      script.onload = () => { clearTimeout(timer); resolve(); };
      script.onerror = () => { clearTimeout(timer); reject(new Error("Failed to load SDK script")); };
      document.head.appendChild(script);
    });
  }

  function renderMock(el) {
    el.innerHTML = '<div class="tk-editor-mock" style="display:flex;align-items:center;justify-content:center;height:100%;border:2px dashed #1f3b5e;color:#1f3b5e">Editor unavailable (preview mode)</div>';
  }

  function setLoading(el, on) {
    if (on) {
      el.setAttribute("aria-busy", "true");
      el.dataset.loading = "true";
    } else {
      el.removeAttribute("aria-busy");
      delete el.dataset.loading;
    }
  }

  async function mount(el, hooks = {}) {
    let cfg;
    try {
      const res = await fetch(CONFIG_URL);
      cfg = await res.json();
      if (!res.ok) throw Object.assign(new Error(cfg && cfg.error || "configuration error"), { details: cfg });
    } catch (err) {
      console.error("TKDesigner: configuration error", err);
      setLoading(el, false);
      hooks.onState && hooks.onState("error");
      return { unmount() {} };
    }
    let retries = 0;
    let timer = null;
    let editor = null;
    let opened = false;
    let unmounted = false;
    if (!el.id) el.id = cfg.editor.containerId;

    const publish = (state) => { if (!unmounted && hooks.onState) hooks.onState(state); };

    const fail = (err) => {
      if (unmounted) return;
      if (opened) {
        // Once open, vendor errors are reported but the editor stays up.
        console.error("TKDesigner: error after open", err);
        return;
      }
      console.error("TKDesigner: editor error", err);
      if (editor) { try { editor.close(); } catch (_) {} editor = null; }
      el.innerHTML = "";
      if (err && (err.code === "AUTH_ERROR" || err.code === "401" || err.status === 401)) {
        setLoading(el, false);
        publish("error");
        return;
      }
      if (retries >= cfg.retry.maxAttempts) {
        setLoading(el, false);
        renderMock(el);
        publish("mock");
        return;
      }
      retries += 1;
      const delay = delayFor(cfg.retry, retries);
      publish("retrying");
      timer = setTimeout(attempt, delay);
    };

    async function attempt() {
      timer = null;
      if (unmounted) return;
      setLoading(el, true);
      publish("loading");
      try {
        await injectScript(cfg.sdkUrl, cfg.loadTimeoutMs);
        await new Promise((r) => setTimeout(r, cfg.globalWaitMs));
        if (unmounted) return;
        if (!global.Picsart) throw new Error("SDK loaded but Picsart object not found");
        const settings = Object.assign({}, cfg.editor, {
          containerId: el.id,
          userAgent: navigator.userAgent,
          origin: global.location.origin,
          domain: global.location.hostname,
        });
        editor = new global.Picsart(settings);
        editor.onOpen(() => {
          if (unmounted || opened) return;
          opened = true;
          setLoading(el, false);
          publish("open");
        });
        editor.onError(fail);
        editor.open(cfg.open);
      } catch (err) {
        fail(err);
      }
    }

    attempt();
    return {
      unmount() {
        unmounted = true;
        if (timer) clearTimeout(timer);
        if (editor) { try { editor.close(); } catch (_) {} }
        setLoading(el, false);
        el.innerHTML = "";
      },
    };
  }

  global.TKDesignerEditor = { mount };
})(window);
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_after_open_do_not_tear_down() {
        let js = bootstrap_script();
        let fail = &js[js.find("const fail = (err) => {").unwrap()..];
        let guard = fail.find("if (opened)").unwrap();
        assert!(guard < fail.find("editor.close()").unwrap());
        assert!(guard < fail.find("renderMock(el)").unwrap());
        assert!(js.contains("opened = true;"));
    }

    #[test]
    fn config_failures_publish_error() {
        let js = bootstrap_script();
        let mount = &js[js.find("async function mount").unwrap()..];
        let try_at = mount.find("try {").unwrap();
        assert!(try_at < mount.find("await fetch(CONFIG_URL)").unwrap());
        assert!(try_at < mount.find("await res.json()").unwrap());
        let catch = &mount[mount.find("} catch (err) {").unwrap()..];
        assert!(catch.find("hooks.onState(\"error\")").unwrap() < catch.find("return").unwrap());
    }

    #[test]
    fn loading_indicator_is_cleared_on_every_outcome() {
        let js = bootstrap_script();
        assert_eq!(js.matches("setLoading(el, true)").count(), 1);
        // config error, open, auth error, mock, unmount
        assert_eq!(js.matches("setLoading(el, false)").count(), 5);
    }
}
