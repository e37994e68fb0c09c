use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
}

// FromStr instead of From<&str>: callers use `method.parse()`.
impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET"    => Ok(Method::GET),
            "POST"   => Ok(Method::POST),
            "PUT"    => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            _        => Err(()),
        }
    }
}
