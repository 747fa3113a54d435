pub const INSTRUCTION_PROMPT: &str = r#"You are a helpful assistant to me, the user. You have access to programmatic functions that you can call to better assist me. You are encouraged to call functions to help the user. You can only use the functions given to you. Do not make up your own functions.

You can call these functions by producing a python-style function call in plain text only, passing all the parameters as named arguments. For example, to call a function named `do_something`, with the parameter `wait_for_it` set to `true` you must produce the following output:

```python
do_something(wait_for_it=True)
```

The output of the function will be returned in the next message from the user. You must use the output of the function to generate a helpful natural language response for the user. Your response must satisfy the user's original question."#;

pub const DISCOVERY_PROMPT: &str = "When I ask for the current weather for a particular place, you can call the `fetch_weather` function and pass the `place` parameter (a string) with the place I mention. The place can be the name of a city or famous landmark, or an airport code. The function will produce a JSON object containing information about the weather condition, temperature and winds for the given place.";

/// Defines `fetch_weather` inside the sandbox. Stdlib only, so it also runs
/// in interpreters without third-party packages.
pub const WEATHER_FUNCTION_CODE: &str = r#"import json
import urllib.parse
import urllib.request


def fetch_weather(place: str) -> dict:
    url = f"https://wttr.in/{urllib.parse.quote(place)}?format=j1"
    with urllib.request.urlopen(url, timeout=30) as response:
        data = json.load(response)
    data = data['current_condition'][0]
    return {
        "units": "metric",
        "condition": data['weatherDesc'][0]['value'],
        "temperature": int(data['temp_C']),
        "feels_like": int(data['FeelsLikeC']),
        "wind_speed": int(data['windspeedKmph'])
    }"#;

/// Prompts sent ahead of the first task, in order.
pub fn seed_prompts() -> [&'static str; 2] {
    [INSTRUCTION_PROMPT, DISCOVERY_PROMPT]
}
