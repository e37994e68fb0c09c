use std::fmt::Write;

use crate::registry::WorkerView;

const TITLE: &str = "Geolocation Service";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn analyze_form(default_target: &str) -> String {
    format!(
        "<form action='/analyze' method='GET'>\
         Enter a url and we will try to estimate its physical location (only HTTP is supported):<br>\
         <input type='text' name='target' size='80' value='{}'>\
         <input type='submit'>\
         </form>",
        escape_html(default_target)
    )
}

pub fn index_page() -> String {
    format!(
        "<html><head><title>{}</title></head><body>\
         <h3>Welcome to the geolocation service</h3>\
         {}\
         </body></html>",
        TITLE,
        analyze_form("http://www.google.com/")
    )
}

pub fn hello_page(bgcolor: &str, name: &str) -> String {
    format!(
        "<html><head><title>Hello World!</title></head>\
         <body style='background-color:{}'>\
         <h1>Hello {}, hit page refresh (F5) to refresh this page,<br>\
         though the contents will never change, sadly.</h1>\
         </body></html>",
        escape_html(bgcolor),
        escape_html(name)
    )
}

/// Per-worker RTT table plus the minimum-RTT estimate, if there is one.
pub fn analyze_page(target: Option<&str>, dispatched: usize, workers: &[WorkerView], best: Option<&WorkerView>) -> String {
    let mut msg = String::new();
    // Writing into a String cannot fail.
    let _ = write!(msg, "<html><head><title>{}</title></head><body>", TITLE);
    let _ = write!(msg, "<h3>Trying to find your link</h3>{}", analyze_form(""));

    if let Some(target) = target {
        let _ = write!(
            msg,
            "<p>Sent <code>{}</code> to {} of {} workers.</p>",
            escape_html(target),
            dispatched,
            workers.len()
        );
    }

    msg.push_str("<table id='rtts'><tr><th>Location</th><th>Coordinates</th><th>IP</th><th>Average RTT (s)</th></tr>");
    for w in workers {
        let _ = write!(
            msg,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&w.location),
            w.coords,
            escape_html(w.ip.as_deref().unwrap_or("-")),
            w.avg_rtt.map(|r| r.to_string()).unwrap_or_else(|| "not measured".to_string())
        );
    }
    msg.push_str("</table>");

    match best {
        Some(w) => {
            let _ = write!(
                msg,
                "<h2 id='estimate'>Based on the minimum RTT of {} seconds, your location is at {} with coordinates {} and IP {}</h2>",
                w.avg_rtt.unwrap_or_default(),
                escape_html(&w.location),
                w.coords,
                escape_html(w.ip.as_deref().unwrap_or("unknown"))
            );
        }
        None => msg.push_str("<h2 id='estimate'>No RTT measurements yet, try again in a moment.</h2>"),
    }

    msg.push_str("</body></html>");
    msg
}

pub fn rtt_ack_page() -> String {
    format!(
        "<html><head><title>{}</title></head><body>\
         <p>RTT report received.</p>\
         </body></html>",
        TITLE
    )
}
